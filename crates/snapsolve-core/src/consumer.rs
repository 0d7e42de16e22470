use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use snapsolve_types::{HostEvent, LogEntry, LogLevel, TaskResult};

use crate::clipboard::ClipboardSink;
use crate::event_bus::EventReceiver;
use crate::presentation::HostState;

pub const DEFAULT_CONSUMER_CADENCE: Duration = Duration::from_millis(100);

/// Receives every applied event together with the state it produced.
pub trait Presenter {
    fn present(&mut self, event: &HostEvent, state: &HostState);
}

pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _event: &HostEvent, _state: &HostState) {}
}

/// Single owner of [`HostState`]. Drains the event channel on a fixed cadence.
pub struct ConsumerLoop {
    rx: EventReceiver,
    state: HostState,
    clipboard: Box<dyn ClipboardSink>,
    presenter: Box<dyn Presenter>,
    cadence: Duration,
}

impl ConsumerLoop {
    pub fn new(
        rx: EventReceiver,
        state: HostState,
        clipboard: Box<dyn ClipboardSink>,
        presenter: Box<dyn Presenter>,
    ) -> Self {
        Self {
            rx,
            state,
            clipboard,
            presenter,
            cadence: DEFAULT_CONSUMER_CADENCE,
        }
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Applies every event queued right now, in order. Returns how many
    /// channel events were applied.
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, event: HostEvent) {
        self.state.apply(&event);
        self.presenter.present(&event, &self.state);

        if let HostEvent::TaskCompleted {
            result: TaskResult::Answer(text),
        } = &event
        {
            let note = match self.clipboard.copy_text(text) {
                Ok(()) => {
                    tracing::info!(target: "snapsolve.consumer", "answer copied to clipboard");
                    LogEntry::new(LogLevel::Info, "Answer copied to clipboard!")
                }
                Err(e) => {
                    tracing::warn!(target: "snapsolve.consumer", "clipboard copy failed: {e}");
                    LogEntry::new(LogLevel::Error, format!("Failed copy to clipboard: {e}"))
                }
            };
            let note = HostEvent::Log(note);
            self.state.apply(&note);
            self.presenter.present(&note, &self.state);
        }
    }

    /// Polls until `shutdown` fires, then drains once more and hands back the
    /// final state.
    pub async fn run(mut self, shutdown: CancellationToken) -> HostState {
        let mut tick = tokio::time::interval(self.cadence);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.drain_pending();
                }
            }
        }
        self.drain_pending();
        self.state
    }
}
