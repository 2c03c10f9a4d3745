/*
[INPUT]:  Host foreground/background signals and wallet notifications
[OUTPUT]: Notifications admitted only if fired while the host was visible
[POS]:    Auth layer - guard against extension events fired in the background
[UPDATE]: When the host visibility model changes
*/

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

use crate::auth::{WalletEvent, WalletNotification};

/// Visibility changes remembered per guard
const HISTORY_LIMIT: usize = 64;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next position on the process-wide ordering shared by notifications and
/// visibility changes
pub(crate) fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// Shared record of whether the host context is in the foreground.
///
/// Clones share the same record, so the host can flip it while the state
/// machine reads it. Each change is kept with its sequence number so a
/// notification is judged by the visibility at the moment it fired, not
/// when it is read.
#[derive(Debug, Clone)]
pub struct VisibilityGuard {
    changes: Arc<Mutex<VecDeque<(u64, bool)>>>,
}

impl VisibilityGuard {
    /// Create a guard that starts visible
    pub fn new() -> Self {
        Self {
            changes: Arc::new(Mutex::new(VecDeque::from([(0, true)]))),
        }
    }

    fn changes(&self) -> MutexGuard<'_, VecDeque<(u64, bool)>> {
        self.changes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_visible(&self, visible: bool) {
        let mut changes = self.changes();
        if changes.back().map(|(_, current)| *current) == Some(visible) {
            return;
        }
        changes.push_back((next_sequence(), visible));
        while changes.len() > HISTORY_LIMIT {
            changes.pop_front();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.changes()
            .back()
            .map(|(_, visible)| *visible)
            .unwrap_or(true)
    }

    /// Whether the host was visible when `sequence` was taken.
    ///
    /// Older than the remembered history counts as hidden.
    pub fn was_visible_at(&self, sequence: u64) -> bool {
        self.changes()
            .iter()
            .rev()
            .find(|(changed_at, _)| *changed_at < sequence)
            .map(|(_, visible)| *visible)
            .unwrap_or(false)
    }

    /// Admit the event only if it fired while visible
    pub fn admit(&self, notification: WalletNotification) -> Option<WalletEvent> {
        if self.was_visible_at(notification.sequence()) {
            Some(notification.event)
        } else {
            debug!(event = ?notification.event, "wallet notification fired while hidden");
            None
        }
    }

    /// Drain already-delivered notifications, keeping the admitted ones
    pub fn drain(
        &self,
        receiver: &mut broadcast::Receiver<WalletNotification>,
    ) -> Vec<WalletEvent> {
        let mut admitted = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(notification) => admitted.extend(self.admit(notification)),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "wallet notifications lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        admitted
    }
}

impl Default for VisibilityGuard {
    fn default() -> Self {
        Self::new()
    }
}
