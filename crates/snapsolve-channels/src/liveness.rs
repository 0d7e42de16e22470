use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snapsolve_core::EventSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::TransportLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

impl MonitorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MonitorState::Idle,
            1 => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TransportClosed,
    Stale,
    PingFailed,
}

/// Periodic keepalive for one connection lifetime. Never restarts once stopped.
pub struct LivenessMonitor {
    link: Arc<dyn TransportLink>,
    period: Duration,
    timeout: Duration,
    events: EventSender,
    state: Arc<AtomicU8>,
}

impl LivenessMonitor {
    pub fn new(
        link: Arc<dyn TransportLink>,
        period: Duration,
        timeout: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            link,
            period,
            timeout,
            events,
            state: Arc::new(AtomicU8::new(MonitorState::Idle as u8)),
        }
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn start(self) -> LivenessHandle {
        let cancel = CancellationToken::new();
        let state = self.state.clone();
        state.store(MonitorState::Running as u8, Ordering::SeqCst);
        let task = tokio::spawn(self.run(cancel.clone()));
        LivenessHandle {
            cancel,
            state,
            task: Some(task),
        }
    }

    async fn run(self, cancel: CancellationToken) -> StopReason {
        debug!(
            "liveness monitor running: period {:?}, timeout {:?}",
            self.period, self.timeout
        );
        // first ping goes out as soon as the connection opens
        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Requested;
            }
            if !self.link.is_open() {
                break StopReason::TransportClosed;
            }
            let idle = self.link.last_activity().elapsed();
            if idle > self.period + self.timeout {
                self.events.warn(format!(
                    "No traffic from server for {}s, closing stale connection.",
                    idle.as_secs()
                ));
                self.link.close();
                break StopReason::Stale;
            }
            if let Err(e) = self.link.send_ping() {
                self.events.warn(format!("Ping failed: {e}"));
                break StopReason::PingFailed;
            }
            debug!("ping sent");
            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Requested,
                _ = tokio::time::sleep(self.period) => {}
            }
        };
        self.state
            .store(MonitorState::Stopped as u8, Ordering::SeqCst);
        debug!("liveness monitor stopped: {reason:?}");
        reason
    }
}

pub struct LivenessHandle {
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<StopReason>>,
}

impl LivenessHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the monitor task. `None` if it was already joined or panicked.
    pub async fn join(&mut self) -> Option<StopReason> {
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
