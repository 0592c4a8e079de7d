//! Still images standing in for a camera on hosts without one.
use field_core::{SessionError, VideoSource};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Serves one image file, or cycles through a directory of them one per grab.
pub struct StillFrameCamera {
    frames: Vec<PathBuf>,
    next: AtomicUsize,
    stopped: AtomicBool,
}

impl StillFrameCamera {
    pub fn open(source: &Path) -> Result<Self, SessionError> {
        let frames = if source.is_dir() {
            let entries = std::fs::read_dir(source).map_err(|e| {
                SessionError::DeviceUnavailable(format!("cannot read {}: {e}", source.display()))
            })?;
            let mut frames: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image(path))
                .collect();
            frames.sort();
            frames
        } else if source.is_file() {
            vec![source.to_path_buf()]
        } else {
            return Err(SessionError::DeviceUnavailable(format!(
                "no camera source at {}",
                source.display()
            )));
        };

        if frames.is_empty() {
            return Err(SessionError::DeviceUnavailable(format!(
                "no images in {}",
                source.display()
            )));
        }
        tracing::info!("camera serving {} still frame(s) from {}", frames.len(), source.display());
        Ok(Self {
            frames,
            next: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl VideoSource for StillFrameCamera {
    fn grab(&self) -> Option<RgbImage> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        let path = &self.frames[index];
        match image::open(path) {
            Ok(image) => Some(image.to_rgb8()),
            Err(e) => {
                tracing::warn!("failed to read frame {}: {}", path.display(), e);
                None
            }
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::info!("camera stopped");
        }
    }
}
