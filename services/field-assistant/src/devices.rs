use crate::camera::StillFrameCamera;
use async_trait::async_trait;
use field_core::{AudioSource, MediaDevices, SessionError, VideoSource};
use field_native_utils::microphone::CpalMicrophone;
use std::path::PathBuf;
use std::sync::Arc;

/// Desktop capture: a cpal microphone and a still-frame camera.
pub struct DesktopDevices {
    pub input_device: Option<String>,
    pub frames: Option<PathBuf>,
}

#[async_trait]
impl MediaDevices for DesktopDevices {
    async fn open_microphone(&self) -> field_core::Result<Arc<dyn AudioSource>> {
        let name = self.input_device.clone();
        let microphone = tokio::task::spawn_blocking(move || CpalMicrophone::open(name.as_deref()))
            .await
            .map_err(|e| SessionError::DeviceUnavailable(format!("microphone probe failed: {e}")))??;
        Ok(Arc::new(microphone))
    }

    async fn open_camera(&self) -> field_core::Result<Arc<dyn VideoSource>> {
        let Some(frames) = self.frames.clone() else {
            return Err(SessionError::DeviceUnavailable(
                "no camera source; pass --frames or set FRAME_SOURCE".to_string(),
            ));
        };
        let camera = tokio::task::spawn_blocking(move || StillFrameCamera::open(&frames))
            .await
            .map_err(|e| SessionError::DeviceUnavailable(format!("camera probe failed: {e}")))??;
        Ok(Arc::new(camera))
    }
}
