//! Typed progress/status events and the cancellation helpers shared by
//! every long-running operation.
//!
//! Each operation receives a [`Reporter`] and a [`CancellationToken`]; the
//! presentation layer owns the receiving half of the channel.

use crate::{InstallerError, Result};
use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Percentage in `0..=100`
    Progress(u8),
    Status(String),
    Done,
    Cancelled,
    Failed(String),
}

/// Sending half of the event channel. A silent reporter drops everything.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    tx: Option<UnboundedSender<InstallEvent>>,
    /// Cancelled as soon as a status line is sent
    #[cfg(test)]
    cancel_on_status: Option<CancellationToken>,
}

impl Reporter {
    pub fn channel() -> (Self, UnboundedReceiver<InstallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx), ..Default::default() }, rx)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    /// Reporter that cancels `token` on the first status line.
    #[cfg(test)]
    pub(crate) fn cancelling_on_status(self, token: &CancellationToken) -> Self {
        Self {
            cancel_on_status: Some(token.clone()),
            ..self
        }
    }

    pub fn progress(&self, percent: u8) {
        self.send(InstallEvent::Progress(percent.min(100)));
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("[status] {}", message);
        self.send(InstallEvent::Status(message));
        #[cfg(test)]
        if let Some(token) = &self.cancel_on_status {
            token.cancel();
        }
    }

    pub fn done(&self) {
        self.send(InstallEvent::Done);
    }

    pub fn cancelled(&self) {
        self.send(InstallEvent::Cancelled);
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.send(InstallEvent::Failed(message.into()));
    }

    fn send(&self, event: InstallEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching any more.
            let _ = tx.send(event);
        }
    }
}

/// `processed / total * 100`, truncated. An empty job counts as complete.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) as u64 * 100) / total as u64) as u8
}

pub fn ensure_not_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(InstallerError::Cancelled)
    } else {
        Ok(())
    }
}

/// Collect everything currently queued on the receiver.
#[cfg(test)]
pub(crate) fn drain(rx: &mut UnboundedReceiver<InstallEvent>) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
