//! Timer-driven camera sampling with at most one JPEG encode in flight.
use crate::capture::VideoSource;
use crate::media::VideoFrame;
use crate::outbound::{FrameQueue, PushOutcome};
use crate::stats::SessionStats;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub trait FrameEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage) -> anyhow::Result<Vec<u8>>;
}

pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, image: &RgbImage) -> anyhow::Result<Vec<u8>> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(image)?;
        Ok(jpeg)
    }
}

/// Target size that fits inside `max` on the long edge. Never upscales.
pub fn fit_within(width: u32, height: u32, max: Option<u32>) -> (u32, u32) {
    let Some(max) = max.filter(|&m| m > 0) else {
        return (width, height);
    };
    let long = width.max(height);
    if long <= max {
        return (width, height);
    }
    let scale = max as f64 / long as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Cleared when the encode holding it finishes or is dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub enum TickOutcome {
    /// The previous encode is still running.
    Skipped,
    Started(EncodeJob),
}

pub struct EncodeJob {
    seq: u64,
    max_dimension: Option<u32>,
    _permit: InFlight,
}

impl EncodeJob {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Grab, downscale and encode one still. `Ok(None)` when the camera had nothing.
    pub fn run(
        self,
        source: &dyn VideoSource,
        encoder: &dyn FrameEncoder,
    ) -> anyhow::Result<Option<VideoFrame>> {
        let Some(image) = source.grab() else {
            return Ok(None);
        };
        let (w, h) = fit_within(image.width(), image.height(), self.max_dimension);
        let image = if (w, h) == image.dimensions() {
            image
        } else {
            imageops::resize(&image, w, h, FilterType::Triangle)
        };
        let jpeg = encoder.encode(&image)?;
        Ok(Some(VideoFrame::new(self.seq, w, h, jpeg)))
    }
}

pub struct VideoSampler {
    in_flight: Arc<AtomicBool>,
    next_seq: u64,
    max_dimension: Option<u32>,
}

impl VideoSampler {
    pub fn new(max_dimension: Option<u32>) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            next_seq: 0,
            max_dimension,
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return TickOutcome::Skipped;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        TickOutcome::Started(EncodeJob {
            seq,
            max_dimension: self.max_dimension,
            _permit: InFlight(self.in_flight.clone()),
        })
    }
}

/// Drives a [`VideoSampler`] on a fixed interval until `cancel` fires.
pub struct VideoPipeline {
    pub source: Arc<dyn VideoSource>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub queue: FrameQueue<VideoFrame>,
    pub stats: Arc<SessionStats>,
    pub interval: Duration,
    pub max_dimension: Option<u32>,
}

impl VideoPipeline {
    /// Returns only once no encode can touch the camera again.
    pub async fn run(self, cancel: CancellationToken) {
        let mut sampler = VideoSampler::new(self.max_dimension);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let job = match sampler.tick() {
                TickOutcome::Started(job) => job,
                TickOutcome::Skipped => {
                    tracing::debug!("previous frame still encoding, skipping tick");
                    self.stats.record_video_skipped();
                    continue;
                }
            };
            in_flight = Some(tokio::spawn(encode_and_queue(
                job,
                self.source.clone(),
                self.encoder.clone(),
                self.queue.clone(),
                self.stats.clone(),
                cancel.clone(),
            )));
        }

        if let Some(task) = in_flight {
            if let Err(e) = task.await {
                tracing::error!("video encode task failed: {}", e);
            }
        }
        tracing::debug!("video sampling stopped");
    }
}

async fn encode_and_queue(
    job: EncodeJob,
    source: Arc<dyn VideoSource>,
    encoder: Arc<dyn FrameEncoder>,
    queue: FrameQueue<VideoFrame>,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
) {
    let seq = job.seq();
    let job_cancel = cancel.clone();
    let encoded = tokio::task::spawn_blocking(move || {
        if job_cancel.is_cancelled() {
            return Ok(None);
        }
        job.run(source.as_ref(), encoder.as_ref())
    })
    .await;
    let frame = match encoded {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            tracing::warn!("failed to encode video frame {}: {:?}", seq, e);
            return;
        }
        Err(e) => {
            tracing::error!("video encode job failed: {}", e);
            return;
        }
    };
    if cancel.is_cancelled() {
        return;
    }
    if queue.push(frame) != PushOutcome::Closed {
        stats.record_video_sent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::AtomicUsize;

    struct SolidCamera {
        grabs: AtomicUsize,
        size: (u32, u32),
    }

    impl VideoSource for SolidCamera {
        fn grab(&self) -> Option<RgbImage> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Some(RgbImage::from_pixel(self.size.0, self.size.1, Rgb([200, 40, 40])))
        }

        fn stop(&self) {}
    }

    /// Takes a while to produce a frame and remembers any grab after stop.
    #[derive(Default)]
    struct SlowCamera {
        grabbing: AtomicBool,
        stopped: AtomicBool,
        grabs_after_stop: AtomicUsize,
    }

    impl VideoSource for SlowCamera {
        fn grab(&self) -> Option<RgbImage> {
            if self.stopped.load(Ordering::SeqCst) {
                self.grabs_after_stop.fetch_add(1, Ordering::SeqCst);
            }
            self.grabbing.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.grabbing.store(false, Ordering::SeqCst);
            Some(RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])))
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct DarkCamera;

    impl VideoSource for DarkCamera {
        fn grab(&self) -> Option<RgbImage> {
            None
        }

        fn stop(&self) {}
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(640, 480, None), (640, 480));
        assert_eq!(fit_within(640, 480, Some(1024)), (640, 480));
        assert_eq!(fit_within(640, 480, Some(320)), (320, 240));
        assert_eq!(fit_within(480, 640, Some(320)), (240, 320));
        assert_eq!(fit_within(640, 480, Some(0)), (640, 480));
    }

    #[test]
    fn test_single_encode_in_flight() {
        let mut sampler = VideoSampler::new(None);
        let first = match sampler.tick() {
            TickOutcome::Started(job) => job,
            TickOutcome::Skipped => panic!("first tick must start"),
        };
        assert!(matches!(sampler.tick(), TickOutcome::Skipped));
        assert!(matches!(sampler.tick(), TickOutcome::Skipped));
        drop(first);
        match sampler.tick() {
            TickOutcome::Started(job) => assert_eq!(job.seq(), 1),
            TickOutcome::Skipped => panic!("permit was released"),
        }
    }

    #[test]
    fn test_job_downscales_and_encodes_jpeg() {
        let camera = SolidCamera {
            grabs: AtomicUsize::new(0),
            size: (64, 32),
        };
        let mut sampler = VideoSampler::new(Some(16));
        let TickOutcome::Started(job) = sampler.tick() else {
            panic!("tick skipped");
        };
        let frame = job
            .run(&camera, &JpegFrameEncoder::new(60))
            .unwrap()
            .unwrap();
        assert_eq!(frame.dimensions(), (16, 8));
        assert_eq!(frame.mime_type(), "image/jpeg");
        // JPEG SOI marker
        assert_eq!(&frame.jpeg()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_job_without_frame() {
        let mut sampler = VideoSampler::new(None);
        let TickOutcome::Started(job) = sampler.tick() else {
            panic!("tick skipped");
        };
        assert!(job.run(&DarkCamera, &JpegFrameEncoder::new(60)).unwrap().is_none());
        assert!(matches!(sampler.tick(), TickOutcome::Started(_)));
    }

    #[tokio::test]
    async fn test_pipeline_sends_latest_frame_until_cancelled() {
        let camera = Arc::new(SolidCamera {
            grabs: AtomicUsize::new(0),
            size: (8, 8),
        });
        let queue = FrameQueue::bounded(1);
        let stats = Arc::new(SessionStats::new());
        let cancel = CancellationToken::new();
        let pipeline = VideoPipeline {
            source: camera.clone(),
            encoder: Arc::new(JpegFrameEncoder::new(60)),
            queue: queue.clone(),
            stats: stats.clone(),
            interval: Duration::from_millis(20),
            max_dimension: None,
        };
        let handle = tokio::spawn(pipeline.run(cancel.clone()));

        let frame = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.dimensions(), (8, 8));

        cancel.cancel();
        handle.await.unwrap();
        let grabs = camera.grabs.load(Ordering::SeqCst) as u64;
        let snapshot = stats.snapshot();
        assert!(snapshot.video_frames_sent >= 1);
        assert!(snapshot.video_frames_sent <= grabs);
        assert!(queue.len() <= 1);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_waits_for_inflight_grab() {
        let camera = Arc::new(SlowCamera::default());
        let queue = FrameQueue::bounded(1);
        let cancel = CancellationToken::new();
        let pipeline = VideoPipeline {
            source: camera.clone(),
            encoder: Arc::new(JpegFrameEncoder::new(60)),
            queue: queue.clone(),
            stats: Arc::new(SessionStats::new()),
            interval: Duration::from_millis(5),
            max_dimension: None,
        };
        let handle = tokio::spawn(pipeline.run(cancel.clone()));

        while !camera.grabbing.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert!(!camera.grabbing.load(Ordering::SeqCst));

        camera.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(camera.grabs_after_stop.load(Ordering::SeqCst), 0);
    }
}
