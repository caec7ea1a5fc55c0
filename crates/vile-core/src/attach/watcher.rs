//! Polling hotplug watcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::host::UsbHost;
use super::machine::Attachment;

/// Background thread that rescans the bus and reconciles the attachment.
pub struct Watcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn spawn<H: UsbHost + 'static>(attachment: Arc<Attachment<H>>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "Hotplug watcher started");
            while !flag.load(Ordering::Acquire) {
                match attachment.host().scan() {
                    Ok(present) => {
                        if let Err(e) = attachment.refresh(&present) {
                            warn!(error = %e, "Attach failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "Bus scan failed"),
                }
                thread::park_timeout(interval);
            }
            debug!("Hotplug watcher stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}
