//! # Retry Sender
//!
//! At-least-once delivery on top of a fire-and-forget transport: the
//! payload is sent right away and then once per interval until the sender
//! is closed (or dropped) or `max_times` sends were made. `max_times == 0`
//! means unbounded.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct RetrySender {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RetrySender {
    /// Starts resending `payload`. `send` receives the payload and the
    /// 1-based attempt number.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<P, F>(
        name: &'static str,
        payload: P,
        send: F,
        interval: Duration,
        max_times: u32,
    ) -> Self
    where
        P: Send + 'static,
        F: Fn(&P, u32) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut times = 0u32;
            loop {
                ticker.tick().await;
                times = times.saturating_add(1);
                send(&payload, times);
                if max_times != 0 && times >= max_times {
                    debug!(sender = name, times, "Retry sender reached attempt cap");
                    break;
                }
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the sender stopped on its own (attempt cap).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops resending. Dropping the sender has the same effect.
    pub fn close(self) {}
}

impl Drop for RetrySender {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
