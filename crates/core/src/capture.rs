//! Contract with the platform media APIs and scoped ownership of the acquired tracks.
use crate::error::Result;
use async_trait::async_trait;
use image::RgbImage;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives mono samples at the source's native rate, on the capture thread.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A live microphone track.
#[cfg_attr(test, automock)]
pub trait AudioSource: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Begin delivering samples. The callback runs on a real-time thread.
    fn start(&self, on_samples: SampleCallback) -> Result<()>;

    /// Stop the hardware track. Safe to call more than once.
    fn stop(&self);
}

/// A live camera track.
#[cfg_attr(test, automock)]
pub trait VideoSource: Send + Sync {
    /// The current frame at native resolution, if the camera has one.
    fn grab(&self) -> Option<RgbImage>;

    fn stop(&self);
}

/// Host platform access to capture hardware.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_microphone(&self) -> Result<Arc<dyn AudioSource>>;
    async fn open_camera(&self) -> Result<Arc<dyn VideoSource>>;
}

pub struct MediaCaptureAdapter<D> {
    devices: D,
}

impl<D: MediaDevices> MediaCaptureAdapter<D> {
    pub fn new(devices: D) -> Self {
        Self { devices }
    }

    /// Request microphone and camera together. Either both tracks come back
    /// or neither does: a track that opened is stopped when its sibling fails,
    /// or when this future is dropped before the sibling resolves.
    pub async fn acquire(&self) -> Result<CaptureHandle> {
        let (audio, video) = tokio::join!(
            async { self.devices.open_microphone().await.map(TrackGuard::new) },
            async { self.devices.open_camera().await.map(TrackGuard::new) },
        );
        match (audio, video) {
            (Ok(audio), Ok(video)) => {
                let audio = audio.into_inner();
                tracing::info!("capture acquired, microphone at {}hz", audio.sample_rate());
                Ok(CaptureHandle::new(audio, video.into_inner()))
            }
            (Err(e), Ok(_video)) => {
                tracing::warn!("microphone unavailable, releasing camera: {}", e);
                Err(e)
            }
            (Ok(_audio), Err(e)) => {
                tracing::warn!("camera unavailable, releasing microphone: {}", e);
                Err(e)
            }
            (Err(e), Err(video_err)) => {
                tracing::warn!("camera also unavailable: {}", video_err);
                Err(e)
            }
        }
    }
}

trait Track {
    fn halt(&self);
}

impl Track for dyn AudioSource {
    fn halt(&self) {
        self.stop();
    }
}

impl Track for dyn VideoSource {
    fn halt(&self) {
        self.stop();
    }
}

/// Stops a freshly opened track unless it is handed on.
struct TrackGuard<T: Track + ?Sized> {
    track: Arc<T>,
    armed: bool,
}

impl<T: Track + ?Sized> TrackGuard<T> {
    fn new(track: Arc<T>) -> Self {
        Self { track, armed: true }
    }

    fn into_inner(mut self) -> Arc<T> {
        self.armed = false;
        self.track.clone()
    }
}

impl<T: Track + ?Sized> Drop for TrackGuard<T> {
    fn drop(&mut self) {
        if self.armed {
            self.track.halt();
        }
    }
}

/// Owns both hardware tracks. Dropping it releases them.
pub struct CaptureHandle {
    audio: Arc<dyn AudioSource>,
    video: Arc<dyn VideoSource>,
    released: AtomicBool,
}

impl CaptureHandle {
    pub fn new(audio: Arc<dyn AudioSource>, video: Arc<dyn VideoSource>) -> Self {
        Self {
            audio,
            video,
            released: AtomicBool::new(false),
        }
    }

    pub fn audio(&self) -> &Arc<dyn AudioSource> {
        &self.audio
    }

    pub fn video(&self) -> &Arc<dyn VideoSource> {
        &self.video
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stop every track. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.audio.stop();
        self.video.stop();
        tracing::info!("capture released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use std::time::Duration;

    struct SlowMicrophone {
        camera: Arc<dyn VideoSource>,
    }

    #[async_trait]
    impl MediaDevices for SlowMicrophone {
        async fn open_microphone(&self) -> Result<Arc<dyn AudioSource>> {
            std::future::pending().await
        }

        async fn open_camera(&self) -> Result<Arc<dyn VideoSource>> {
            Ok(self.camera.clone())
        }
    }

    fn stopping_audio(times: usize) -> Arc<dyn AudioSource> {
        let mut audio = MockAudioSource::new();
        audio.expect_sample_rate().return_const(48_000u32);
        audio.expect_stop().times(times).return_const(());
        Arc::new(audio)
    }

    fn stopping_video(times: usize) -> Arc<dyn VideoSource> {
        let mut video = MockVideoSource::new();
        video.expect_stop().times(times).return_const(());
        Arc::new(video)
    }

    #[tokio::test]
    async fn test_acquire_both_tracks() {
        let mut devices = MockMediaDevices::new();
        devices
            .expect_open_microphone()
            .times(1)
            .returning(|| Ok(stopping_audio(1)));
        devices
            .expect_open_camera()
            .times(1)
            .returning(|| Ok(stopping_video(1)));

        let handle = MediaCaptureAdapter::new(devices).acquire().await.unwrap();
        handle.release();
        handle.release();
        assert!(handle.is_released());
        // drop must not stop the tracks a second time
        drop(handle);
    }

    #[tokio::test]
    async fn test_denied_microphone_releases_camera() {
        let mut devices = MockMediaDevices::new();
        devices
            .expect_open_microphone()
            .returning(|| Err(SessionError::PermissionDenied("microphone".into())));
        devices
            .expect_open_camera()
            .returning(|| Ok(stopping_video(1)));

        let err = MediaCaptureAdapter::new(devices).acquire().await.err();
        assert_eq!(
            err,
            Some(SessionError::PermissionDenied("microphone".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_camera_releases_microphone() {
        let mut devices = MockMediaDevices::new();
        devices
            .expect_open_microphone()
            .returning(|| Ok(stopping_audio(1)));
        devices
            .expect_open_camera()
            .returning(|| Err(SessionError::DeviceUnavailable("no camera".into())));

        let err = MediaCaptureAdapter::new(devices).acquire().await.err();
        assert!(matches!(err, Some(SessionError::DeviceUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_acquire_stops_opened_camera() {
        let adapter = MediaCaptureAdapter::new(SlowMicrophone {
            camera: stopping_video(1),
        });
        let outcome = tokio::time::timeout(Duration::from_millis(50), adapter.acquire()).await;
        assert!(outcome.is_err());
        // the mock verifies exactly one stop when the adapter drops
        drop(adapter);
    }

    #[test]
    fn test_drop_releases_tracks() {
        let handle = CaptureHandle::new(stopping_audio(1), stopping_video(1));
        drop(handle);
    }
}
