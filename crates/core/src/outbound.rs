//! Bounded drop-oldest queues between the capture pipelines and the transport.
//!
//! Producers run on the audio callback thread and on the video timer; neither
//! may block. When a queue is full the oldest frame is evicted so the endpoint
//! always sees the freshest media.
use crate::media::{AudioFrame, OutboundFrame, VideoFrame};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full and the oldest frame was discarded to make room.
    DisplacedOldest,
    Closed,
}

pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            notify: self.notify.clone(),
            closed: self.closed.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> FrameQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never blocks.
    pub fn push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        let mut outcome = PushOutcome::Queued;
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        outcome = PushOutcome::DisplacedOldest;
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
            }
        }
        self.notify.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next frame. Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            match self.rx.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting frames and wake any waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Both outbound lanes. Video holds a single slot: a newer still always wins.
#[derive(Clone)]
pub struct OutboundMedia {
    pub audio: FrameQueue<AudioFrame>,
    pub video: FrameQueue<VideoFrame>,
}

impl OutboundMedia {
    pub fn new(audio_capacity: usize) -> Self {
        Self {
            audio: FrameQueue::bounded(audio_capacity),
            video: FrameQueue::bounded(1),
        }
    }

    /// Next frame for the wire, audio first. `None` once both lanes are closed.
    pub async fn next(&self) -> Option<OutboundFrame> {
        let mut audio_open = true;
        let mut video_open = true;
        loop {
            if let Some(frame) = self.audio.try_pop() {
                return Some(OutboundFrame::Audio(frame));
            }
            if let Some(frame) = self.video.try_pop() {
                return Some(OutboundFrame::Video(frame));
            }
            if !audio_open && !video_open {
                return None;
            }
            tokio::select! {
                biased;
                frame = self.audio.recv(), if audio_open => match frame {
                    Some(frame) => return Some(OutboundFrame::Audio(frame)),
                    None => audio_open = false,
                },
                frame = self.video.recv(), if video_open => match frame {
                    Some(frame) => return Some(OutboundFrame::Video(frame)),
                    None => video_open = false,
                },
            }
        }
    }

    pub fn close(&self) {
        self.audio.close();
        self.video.close();
    }
}
