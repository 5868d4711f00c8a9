use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::work::{Image, WorkUnit};

/// Blocking image source. Failure is reported as `None`, never as a panic.
pub trait ImageSource: Send + Sync {
    fn download_image(&self) -> Option<Image>;
}

/// Wraps one download from `source` as a work unit.
pub fn download_work(source: Arc<dyn ImageSource>) -> WorkUnit<Image> {
    WorkUnit::new(move || source.download_image())
}

/// Stand-in for a network download: sleeps for `latency`, then yields an
/// image with a sequential id (`image-1`, `image-2`, ...).
#[derive(Debug)]
pub struct SimulatedDownloader {
    latency: Duration,
    fail: bool,
    downloads: AtomicU64,
}

impl SimulatedDownloader {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail: false,
            downloads: AtomicU64::new(0),
        }
    }

    /// Every download completes but yields no image.
    pub fn failing(latency: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(latency)
        }
    }

    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }
}

impl ImageSource for SimulatedDownloader {
    fn download_image(&self) -> Option<Image> {
        thread::sleep(self.latency);
        let n = self.downloads.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail {
            debug!(download = n, "simulated download failed");
            return None;
        }
        let id = format!("image-{n}");
        let data = id.as_bytes().to_vec();
        Some(Image::new(id).with_data(data))
    }
}
