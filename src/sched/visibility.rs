//! Visibility capability for cadence decisions
//!
//! The scheduler never talks to a browser-style global; it observes an
//! injected [`Visibility`] source. Production wires a [`VisibilitySignal`]
//! that the API layer (or an embedding host) flips; tests flip it directly.

use tokio::sync::watch;

/// Source of the visible/hidden signal
pub trait Visibility: Send + Sync {
    fn is_hidden(&self) -> bool;
    /// Watch channel carrying the hidden flag; receivers wake on transitions
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Watch-channel-backed visibility signal
pub struct VisibilitySignal {
    tx: watch::Sender<bool>,
}

impl VisibilitySignal {
    pub fn new(hidden: bool) -> Self {
        let (tx, _rx) = watch::channel(hidden);
        Self { tx }
    }

    /// Flip the hidden flag. Setting the current value again does not wake
    /// watchers, so redundant reports cannot reshape schedules.
    pub fn set_hidden(&self, hidden: bool) {
        self.tx.send_if_modified(|current| {
            if *current == hidden {
                false
            } else {
                *current = hidden;
                true
            }
        });
    }
}

impl Visibility for VisibilitySignal {
    fn is_hidden(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
