//! Account change notification bus.
//!
//! A broadcast channel decoupling the pipeline from whatever wants to react
//! to account mutations. Publishing is fire-and-forget: the sender never
//! waits and a missing subscriber is not an error, so a slow or absent
//! consumer can never fail or delay a request.

use tokio::sync::broadcast;

use crate::storage::Account;

/// Events published on the bus.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    /// An account was mutated. Carries the pre-update snapshot, so consumers
    /// can diff against current state.
    AccountChanged { account: Account },
}

#[derive(Debug, Clone)]
pub struct Notifications {
    tx: broadcast::Sender<AccountEvent>,
}

impl Notifications {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an account change. Never blocks, never fails.
    pub fn account_changed(&self, account: Account) {
        // Ignore send errors (no subscriber)
        let _ = self.tx.send(AccountEvent::AccountChanged { account });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.tx.subscribe()
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new()
    }
}
