use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use std::fmt;

fn get_host() -> Host {
    cpal::default_host()
}

/// One entry of a device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " * {}({}ch, {}hz)", self.name, self.channels, self.sample_rate)?;
        if self.is_default {
            write!(f, " [default]")?;
        }
        Ok(())
    }
}

/// The named input device, or the host default when `device_name` is `None`.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let Some(target) = device_name else {
        return host
            .default_input_device()
            .context("No default input device");
    };
    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No input device named {target}"))
}

/// The named output device, or the host default when `device_name` is `None`.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    let Some(target) = device_name else {
        return host
            .default_output_device()
            .context("No default output device");
    };
    host.output_devices()
        .context("Failed to enumerate output devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No output device named {target}"))
}

pub fn available_inputs() -> anyhow::Result<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else {
            continue;
        };
        match device.default_input_config() {
            Ok(cfg) => devices.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: cfg.channels(),
                sample_rate: cfg.sample_rate().0,
            }),
            Err(e) => tracing::debug!("skipping input {}: {}", name, e),
        }
    }
    Ok(devices)
}

pub fn available_outputs() -> anyhow::Result<Vec<DeviceInfo>> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let Ok(name) = device.name() else {
            continue;
        };
        match device.default_output_config() {
            Ok(cfg) => devices.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: cfg.channels(),
                sample_rate: cfg.sample_rate().0,
            }),
            Err(e) => tracing::debug!("skipping output {}: {}", name, e),
        }
    }
    Ok(devices)
}
