//! Streaming mode: a dedicated worker task plus a bounded, drop-oldest
//! `ImageQueue` (§4.C).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use obs_async::task::{AsyncTask, Joinable};
use obs_async::task;

use crate::device::{Ccd, ExposureStatus};
use crate::error::DeviceError;
use crate::image::{Exposure, Image};

#[derive(Debug, Clone)]
pub struct ImageQueueEntry {
    pub exposure: Exposure,
    pub image: Arc<Image>,
    pub sequence_number: u64,
}

/// A bounded FIFO of ready entries. Overflow drops the oldest and
/// increments `dropped`. §9's Open Question about the dropped counter's
/// memory ordering is resolved explicitly: every access uses
/// `Ordering::SeqCst`.
pub struct ImageQueue {
    max_length: usize,
    entries: Mutex<VecDeque<ImageQueueEntry>>,
    dropped: AtomicU64,
}

impl ImageQueue {
    pub fn new(max_length: usize) -> Self {
        ImageQueue {
            max_length,
            entries: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, entry: ImageQueueEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_length {
            entries.pop_front();
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        entries.push_back(entry);
    }

    pub fn pop(&self) -> Option<ImageQueueEntry> {
        self.entries.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Push-delivery sink a stream can fan images out to instead of queueing
/// them. When a sink is registered, §8 invariant 8 requires
/// `ImageQueue.size == 0`: entries go straight to the sink and are never
/// enqueued.
pub trait ImageSink: Send + Sync {
    fn accept(&self, entry: ImageQueueEntry);
}

struct StreamState {
    queue: Arc<ImageQueue>,
    sink: Option<Arc<dyn ImageSink>>,
    sequence_number: AtomicU64,
}

/// One worker task per active stream: start exposure → wait → read image
/// → construct an [`ImageQueueEntry`] → deliver to the sink or enqueue.
/// Stopping cancels the in-flight exposure, joins the worker, and
/// preserves any pending entries already in the queue.
pub struct Stream {
    task: AsyncTask<(), ()>,
    queue: Arc<ImageQueue>,
}

impl Stream {
    pub fn start(
        ccd: Arc<dyn Ccd>,
        exposure: Exposure,
        max_queue_length: usize,
        sink: Option<Arc<dyn ImageSink>>,
    ) -> Self {
        let queue = Arc::new(ImageQueue::new(max_queue_length));
        let state = Arc::new(StreamState {
            queue: queue.clone(),
            sink,
            sequence_number: AtomicU64::new(0),
        });

        let task = task::spawn((), move |_| run_stream(ccd, exposure, state));

        Stream { task, queue }
    }

    pub fn queue(&self) -> &Arc<ImageQueue> {
        &self.queue
    }

    pub async fn stop(mut self) -> Result<(), DeviceError> {
        use obs_async::task::Abortable;
        self.task.abort();
        self.task.join().await.map_err(DeviceError::from)?;
        Ok(())
    }
}

async fn run_stream(ccd: Arc<dyn Ccd>, exposure: Exposure, state: Arc<StreamState>) {
    loop {
        if ccd.start_exposure(exposure.clone()).await.is_err() {
            break;
        }
        if ccd.wait().await.is_err() {
            break;
        }
        if !matches!(ccd.exposure_status().await, ExposureStatus::Exposed) {
            continue;
        }
        let image = match ccd.get_image().await {
            Ok(image) => image,
            Err(_) => break,
        };
        let sequence_number = state.sequence_number.fetch_add(1, Ordering::SeqCst);
        let entry = ImageQueueEntry {
            exposure: exposure.clone(),
            image: Arc::new(image),
            sequence_number,
        };
        match &state.sink {
            Some(sink) => sink.accept(entry),
            None => state.queue.push(entry),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dummy_entry(n: u64) -> ImageQueueEntry {
        use crate::image::{PixelBuffer, Purpose, Rectangle};
        ImageQueueEntry {
            exposure: Exposure::new(Rectangle::full_frame(1, 1), std::time::Duration::from_millis(1))
                .with_purpose(Purpose::Test),
            image: Arc::new(Image::new(1, 1, PixelBuffer::U8(vec![0]))),
            sequence_number: n,
        }
    }

    #[test]
    fn test_streaming_drop_oldest() {
        let queue = ImageQueue::new(4);
        for n in 0..10 {
            queue.push(dummy_entry(n));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.dropped(), 6);
        // oldest surviving entry should be #6, since 0..=5 were evicted.
        assert_eq!(queue.pop().unwrap().sequence_number, 6);
    }
}
