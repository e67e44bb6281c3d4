//! Navigation command sink
//!
//! The session layer never routes anything itself. It emits a command
//! (`/auth/login` with a reason tag, `/dashboard` after login, ...) and the
//! presentation layer decides what to do with it.

use tokio::sync::mpsc;
use tracing::debug;

/// A request to move the user to `path`, with optional query-style params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCommand {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl NavigationCommand {
    pub fn to(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Fire-and-forget navigation sink.
pub trait Navigator: Send + Sync {
    fn emit(&self, command: NavigationCommand);
}

/// Forwards commands into an unbounded channel.
///
/// A dropped receiver is not an error: nobody is listening, so the command
/// is discarded.
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<NavigationCommand>,
}

impl ChannelNavigator {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NavigationCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn emit(&self, command: NavigationCommand) {
        if self.tx.send(command).is_err() {
            debug!("navigation receiver dropped, command discarded");
        }
    }
}

/// Discards every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn emit(&self, _command: NavigationCommand) {}
}
