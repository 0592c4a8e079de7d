//! A cpal input stream exposed as a capture [`AudioSource`].
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as it plays.
use crate::device;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, BuildStreamError, SampleRate, StreamConfig};
use crossbeam_channel::{Sender, bounded};
use field_core::SessionError;
use field_core::capture::{AudioSource, SampleCallback};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

pub(crate) struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    /// Run `build` on a new thread and keep the stream it returns alive until stopped.
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self, SessionError>
    where
        F: FnOnce() -> Result<cpal::Stream, SessionError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), SessionError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // parked until stop() or the sender is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SessionError::DeviceUnavailable(format!("failed to spawn {name}: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(SessionError::DeviceUnavailable(format!(
                "{name} thread exited before the stream started"
            ))),
        }
    }

    /// Blocks until the stream thread has dropped its stream. Async callers
    /// reach this through a blocking task.
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("audio stream thread panicked");
        }
    }
}

pub(crate) fn map_build_error(e: BuildStreamError) -> SessionError {
    match e {
        BuildStreamError::DeviceNotAvailable => {
            SessionError::DeviceUnavailable("device is no longer available".to_string())
        }
        BuildStreamError::BackendSpecific { err }
            if err.description.to_lowercase().contains("permission") =>
        {
            SessionError::PermissionDenied(err.description)
        }
        other => SessionError::DeviceUnavailable(other.to_string()),
    }
}

pub struct CpalMicrophone {
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    stream: Mutex<Option<StreamThread>>,
}

impl CpalMicrophone {
    pub fn open(device_name: Option<&str>) -> Result<Self, SessionError> {
        let input = device::get_or_default_input(device_name)
            .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;
        let name = input.name().ok();
        tracing::info!("Using input device: {:?}", name);
        let config = input
            .default_input_config()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;
        tracing::debug!("Input config: {:?}", config);
        Ok(Self {
            device_name: name,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            stream: Mutex::new(None),
        })
    }
}

impl AudioSource for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, mut on_samples: SampleCallback) -> field_core::Result<()> {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(SessionError::DeviceUnavailable(
                "microphone is already streaming".to_string(),
            ));
        }
        let device_name = self.device_name.clone();
        let config = StreamConfig {
            channels: self.channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: BufferSize::Default,
        };
        let thread = StreamThread::spawn("microphone", move || {
            let input = device::get_or_default_input(device_name.as_deref())
                .map_err(|e| SessionError::DeviceUnavailable(format!("{e:#}")))?;
            let channel_count = config.channels as usize;
            let mut mono: Vec<f32> = Vec::with_capacity(8192);
            input
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if channel_count > 1 {
                            mono.clear();
                            mono.extend(
                                data.chunks(channel_count)
                                    .map(|c| c.iter().sum::<f32>() / c.len() as f32),
                            );
                            on_samples(&mono);
                        } else {
                            on_samples(data);
                        }
                    },
                    |err| tracing::error!("An error occurred on input stream: {}", err),
                    None,
                )
                .map_err(map_build_error)
        })?;
        *slot = Some(thread);
        tracing::info!("microphone streaming at {}hz", self.sample_rate);
        Ok(())
    }

    fn stop(&self) {
        let thread = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            thread.stop();
            tracing::info!("microphone stopped");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
