//! Event pump
//!
//! Socket tasks never call application code directly. They push jobs onto
//! an [`EventQueue`]; the embedding application runs them by calling
//! [`EventPump::drain`] from whatever task it chooses. All callbacks
//! therefore run one at a time, in enqueue order.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::traits::{ChannelId, ConnectionHandler, TransportEvent, TransportSender};

/// A queued callback
pub type Job = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(0);

/// Allocate a process-unique channel id (starting at 1)
pub fn next_channel_id() -> ChannelId {
    NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

/// Producer side of the pump, cloned into every socket
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl EventQueue {
    /// Queue a job. Returns false once the pump is gone.
    pub fn push<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Queue delivery of a stream event
    pub fn dispatch(
        &self,
        handler: &Arc<dyn ConnectionHandler>,
        link: Arc<dyn TransportSender>,
        event: TransportEvent,
    ) -> bool {
        let handler = handler.clone();
        self.push(move || handler.handle_event(link, event))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Consumer side of the pump
pub struct EventPump {
    rx: mpsc::UnboundedReceiver<Job>,
    queue: EventQueue,
}

impl Default for EventPump {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPump {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            queue: EventQueue { tx },
        }
    }

    /// Handle for producers
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Run queued jobs.
    ///
    /// Waits up to `min_wait` for jobs to arrive and runs each as it comes.
    /// Once `min_wait` has elapsed, keeps running jobs that are already
    /// queued until `max_wait` has elapsed, without waiting for new ones.
    /// A `max_wait` below `min_wait` is raised to `min_wait`.
    ///
    /// Returns the number of jobs run. The first failing job stops the
    /// drain and its error is returned; later jobs stay queued.
    pub async fn drain(&mut self, min_wait: Duration, max_wait: Duration) -> anyhow::Result<usize> {
        let max_wait = max_wait.max(min_wait);
        let start = Instant::now();
        let min_end = start + min_wait;
        let max_end = start + max_wait;
        let mut remaining = min_wait;
        let mut ran = 0;

        loop {
            let job = if remaining.is_zero() {
                match self.rx.try_recv() {
                    Ok(job) => job,
                    Err(_) => break,
                }
            } else {
                match tokio::time::timeout(remaining, self.rx.recv()).await {
                    Ok(Some(job)) => job,
                    _ => break,
                }
            };

            ran += 1;
            job()?;

            let now = Instant::now();
            if now < min_end {
                remaining = min_end - now;
            } else if now < max_end {
                remaining = Duration::ZERO;
            } else {
                break;
            }
        }

        if ran > 0 {
            trace!("Event pump ran {} jobs", ran);
        }
        Ok(ran)
    }

    /// Run every job that is already queued
    pub fn poll(&mut self) -> anyhow::Result<usize> {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            ran += 1;
            job()?;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_channel_ids_unique() {
        let a = next_channel_id();
        let b = next_channel_id();
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let mut pump = EventPump::new();
        let queue = pump.queue();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            assert!(queue.push(move || {
                seen.lock().push(i);
                Ok(())
            }));
        }

        let ran = pump.drain(Duration::ZERO, Duration::from_millis(50)).await.unwrap();
        assert_eq!(ran, 5);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_drain_waits_for_min() {
        let mut pump = EventPump::new();
        let queue = pump.queue();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.push(|| Ok(()));
        });

        let ran = pump
            .drain(Duration::from_millis(500), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(ran, 1);
    }

    #[tokio::test]
    async fn test_drain_returns_on_timeout() {
        let mut pump = EventPump::new();
        let started = Instant::now();
        let ran = pump
            .drain(Duration::from_millis(30), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(ran, 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_failing_job_stops_drain() {
        let mut pump = EventPump::new();
        let queue = pump.queue();
        queue.push(|| Ok(()));
        queue.push(|| Err(anyhow::anyhow!("malformed message")));
        queue.push(|| Ok(()));

        let err = pump
            .drain(Duration::ZERO, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "malformed message");
        assert_eq!(pump.poll().unwrap(), 1);
    }
}
