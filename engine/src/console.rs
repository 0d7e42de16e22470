use std::io::{self, Stdout, Write};

use snapsolve_core::{HostState, Presenter};
use snapsolve_types::{HostEvent, LogLevel};

/// Line-oriented presenter for a terminal. Log lines are already written by
/// the tracing console layer, so only `verbose` repeats them here.
pub struct ConsolePresenter<W: Write = Stdout> {
    out: W,
    verbose: bool,
}

impl ConsolePresenter<Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    fn line(&mut self, text: &str) {
        // a closed stdout must not take the consumer down
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn present(&mut self, event: &HostEvent, state: &HostState) {
        match event {
            HostEvent::Log(entry) => {
                if self.verbose || entry.level == LogLevel::Error {
                    self.line(&entry.formatted());
                }
            }
            HostEvent::Status { text } => self.line(&format!("[status] {text}")),
            HostEvent::ConnectionChanged { connected } => {
                let hint = if state.can_disconnect() {
                    "type `disconnect` to close"
                } else if state.can_connect() {
                    "type `connect` to open"
                } else {
                    "fix configuration to connect"
                };
                let label = if *connected { "connected" } else { "disconnected" };
                self.line(&format!("[connection] {label} ({hint})"));
            }
            HostEvent::TaskCompleted { .. } => {
                if let Some(text) = state.last_result_text() {
                    self.line(&format!("[answer] {text}"));
                }
            }
        }
    }
}
