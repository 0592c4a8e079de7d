//! Default output device driving the software mixer.
use crate::device;
use crate::microphone::{StreamThread, map_build_error};
use anyhow::Context;
use cpal::traits::DeviceTrait;
use cpal::{BufferSize, SampleRate, StreamConfig};
use field_core::SessionError;
use field_core::playback::mixer::{self, MixerHandle};

/// Keeps the output stream playing until dropped.
pub struct Speaker {
    stream: Option<StreamThread>,
    sample_rate: u32,
}

impl Speaker {
    /// Open the output device and return the mixer handle that schedules onto it.
    pub fn start(device_name: Option<&str>, voice_capacity: usize) -> anyhow::Result<(Self, MixerHandle)> {
        let output = device::get_or_default_output(device_name)?;
        let name = output.name().ok();
        tracing::info!("Using output device: {:?}", name);
        let default = output
            .default_output_config()
            .context("Failed to get default output config")?;
        let config = StreamConfig {
            channels: default.channels(),
            sample_rate: SampleRate(default.sample_rate().0),
            buffer_size: BufferSize::Default,
        };
        tracing::info!("Output stream config: {:?}", &config);

        let (handle, mut renderer) = mixer::channel(config.sample_rate.0, voice_capacity);
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;
        let stream = StreamThread::spawn("speaker", move || {
            let output = device::get_or_default_output(name.as_deref())
                .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;
            output
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        renderer.render(data, channels);
                    },
                    |err| tracing::error!("An error occurred on output stream: {}", err),
                    None,
                )
                .map_err(map_build_error)
        })
        .context("Failed to start output stream")?;

        Ok((
            Self {
                stream: Some(stream),
                sample_rate,
            },
            handle,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}
