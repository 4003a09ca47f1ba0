//! At-most-one-active-workflow-per-key guard.
//!
//! The registry maps a workflow key to the signal mailboxes of the task that
//! currently owns it. Claiming is claim-or-reject on a sharded map entry, so
//! two claims for the same key are linearized while claims for different keys
//! never touch the same lock. Release is tied to dropping the [`Claim`], which
//! the owning task does exactly once on its way out.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::rlog_debug;

use super::{SignalKind, WorkflowId, WorkflowState};

struct Slot {
    id: WorkflowId,
    continue_tx: mpsc::Sender<()>,
    cancel_tx: mpsc::Sender<()>,
    state: watch::Receiver<WorkflowState>,
}

/// Receiving side of a workflow's two single-slot mailboxes.
pub struct Mailbox {
    pub continue_rx: mpsc::Receiver<()>,
    pub cancel_rx: mpsc::Receiver<()>,
}

/// Ownership of a key in the registry.
///
/// Publishes the owning task's state and releases the key when dropped.
pub struct Claim {
    key: String,
    id: WorkflowId,
    state_tx: watch::Sender<WorkflowState>,
    registry: Arc<WorkflowRegistry>,
}

impl Claim {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn state(&self) -> WorkflowState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, state: WorkflowState) {
        self.state_tx.send_replace(state);
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let removed = self
            .registry
            .slots
            .remove_if(&self.key, |_, slot| slot.id == self.id)
            .is_some();
        rlog_debug!(
            "Registry release key={} id={} removed={}",
            self.key,
            self.id.short(),
            removed
        );
    }
}

#[derive(Default)]
pub struct WorkflowRegistry {
    slots: DashMap<String, Slot>,
}

impl WorkflowRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `key` for a new workflow, or fail with `Conflict` if one is active.
    pub fn claim(self: &Arc<Self>, key: &str) -> Result<(Claim, Mailbox)> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(_) => Err(Error::Conflict(key.to_string())),
            Entry::Vacant(vacant) => {
                let id = WorkflowId::new();
                let (continue_tx, continue_rx) = mpsc::channel(1);
                let (cancel_tx, cancel_rx) = mpsc::channel(1);
                let (state_tx, state_rx) = watch::channel(WorkflowState::RestartingProtocol);
                vacant.insert(Slot {
                    id,
                    continue_tx,
                    cancel_tx,
                    state: state_rx,
                });
                rlog_debug!("Registry claim key={} id={}", key, id.short());

                let claim = Claim {
                    key: key.to_string(),
                    id,
                    state_tx,
                    registry: Arc::clone(self),
                };
                Ok((
                    claim,
                    Mailbox {
                        continue_rx,
                        cancel_rx,
                    },
                ))
            }
        }
    }

    /// Deliver a signal to the workflow holding `key`.
    ///
    /// Never blocks. A signal of the same kind that is still pending makes
    /// this a no-op. Continue is only accepted while the workflow waits for
    /// confirmation.
    pub fn signal(&self, key: &str, kind: SignalKind) -> Result<()> {
        let slot = self
            .slots
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("no active relogin for {}", key)))?;

        let state = *slot.state.borrow();
        if state.is_terminal() {
            return Err(Error::NotFound(format!("no active relogin for {}", key)));
        }

        let tx = match kind {
            SignalKind::Continue => {
                if state != WorkflowState::WaitingForAuth {
                    return Err(Error::NotFound(format!(
                        "no relogin awaiting confirmation for {} (state: {})",
                        key, state
                    )));
                }
                &slot.continue_tx
            }
            SignalKind::Cancel => &slot.cancel_tx,
        };

        match tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {
                rlog_debug!("Registry signal key={} kind={}", key, kind);
                Ok(())
            }
            Err(TrySendError::Closed(())) => {
                Err(Error::NotFound(format!("no active relogin for {}", key)))
            }
        }
    }

    /// Current state of the workflow holding `key`, if any.
    pub fn state(&self, key: &str) -> Option<WorkflowState> {
        self.slots.get(key).map(|slot| *slot.state.borrow())
    }

    /// Snapshot of every active workflow, sorted by key.
    pub fn active(&self) -> Vec<(String, WorkflowState)> {
        let mut active: Vec<_> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), *slot.state.borrow()))
            .collect();
        active.sort_by(|a, b| a.0.cmp(&b.0));
        active
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
