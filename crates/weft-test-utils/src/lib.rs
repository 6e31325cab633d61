//! Common test helpers for Weft tests
//!
//! - Condition-based waiting (no hardcoded sleeps)
//! - Pump draining until a condition holds
//! - An in-memory transport link that records what is posted to it

use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_transport::{next_channel_id, ChannelId, EventPump, TransportError, TransportSender};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Run pump jobs until `done` holds or `max_wait` passes.
///
/// Panics if a job fails; use [`EventPump::drain`] directly to observe
/// job errors.
pub async fn drain_until(
    pump: &mut EventPump,
    max_wait: Duration,
    mut done: impl FnMut() -> bool,
) -> bool {
    let start = Instant::now();
    loop {
        if done() {
            return true;
        }
        if start.elapsed() >= max_wait {
            return false;
        }
        pump.drain(DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_INTERVAL * 5)
            .await
            .unwrap();
    }
}

// ============================================================================
// Recording Link
// ============================================================================

/// A [`TransportSender`] that keeps every posted payload in memory
pub struct RecordingLink {
    channel_id: ChannelId,
    remote: Option<SocketAddr>,
    posted: Mutex<Vec<Bytes>>,
    connected: AtomicBool,
    closes: AtomicUsize,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Self::with_remote(None)
    }

    pub fn with_remote(remote: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            channel_id: next_channel_id(),
            remote,
            posted: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        })
    }

    /// Everything posted so far
    pub fn posted(&self) -> Vec<Bytes> {
        self.posted.lock().clone()
    }

    pub fn take_posted(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.posted.lock())
    }

    pub fn post_count(&self) -> usize {
        self.posted.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    /// Number of `close()` calls
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl TransportSender for RecordingLink {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn post(&self, data: Bytes) -> weft_transport::Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.posted.lock().push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_link() {
        let link = RecordingLink::new();
        link.post(Bytes::from_static(b"a")).unwrap();
        assert_eq!(link.posted(), vec![Bytes::from_static(b"a")]);

        link.close();
        assert!(link.is_closed());
        assert!(!link.is_connected());
        assert!(link.post(Bytes::from_static(b"b")).is_err());
        assert_eq!(link.take_posted().len(), 1);
        assert_eq!(link.post_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_until() {
        let mut pump = EventPump::new();
        let queue = pump.queue();
        let flag = Arc::new(AtomicBool::new(false));
        let set = flag.clone();
        queue.push(move || {
            set.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(drain_until(&mut pump, DEFAULT_TIMEOUT, || flag.load(Ordering::SeqCst)).await);
        assert!(!drain_until(&mut pump, Duration::from_millis(30), || false).await);
    }

    #[tokio::test]
    async fn test_wait_for() {
        let start = Instant::now();
        assert!(wait_for(|| async { true }, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await);
        assert!(
            !wait_for(
                || async { false },
                DEFAULT_CHECK_INTERVAL,
                Duration::from_millis(30)
            )
            .await
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
