//! Matches echoes of our own sends to the call waiting for them.
//!
//! Every `sendMessage` registers one slot before its frame is written. In
//! [`CorrelationMode::Keyed`] an echo that carries a `correlationId` resolves
//! exactly that slot; an echo without one resolves the most recently
//! registered slot. [`CorrelationMode::Lifo`] always resolves the most
//! recent slot, so concurrent sends whose echoes arrive out of order get
//! each other's results.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use super::protocol::InboundEvent;
use crate::config::CorrelationMode;
use crate::error::{BridgeError, Result};

struct Slot {
    id: String,
    tx: oneshot::Sender<InboundEvent>,
}

/// A registered slot, held by the caller until its echo arrives.
#[derive(Debug)]
pub struct PendingEcho {
    id: String,
    rx: oneshot::Receiver<InboundEvent>,
}

impl PendingEcho {
    /// Correlation id to stamp on the outgoing frame.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the echo. The slot is resolved at most once; if it is
    /// abandoned (connection closed) the wait ends with
    /// [`BridgeError::ConnectionClosed`].
    pub async fn wait(self, timeout: Option<Duration>) -> Result<InboundEvent> {
        match timeout {
            None => self.rx.await.map_err(|_| BridgeError::ConnectionClosed),
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(res) => res.map_err(|_| BridgeError::ConnectionClosed),
                Err(_) => Err(BridgeError::EchoTimeout(limit)),
            },
        }
    }
}

/// Ordered list of outstanding sends.
pub struct Correlator {
    mode: CorrelationMode,
    slots: Mutex<Vec<Slot>>,
}

impl Correlator {
    pub fn new(mode: CorrelationMode) -> Self {
        Self {
            mode,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Push a new slot.
    pub fn register(&self) -> PendingEcho {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slots) = self.slots.lock() {
            prune(&mut slots);
            slots.push(Slot { id: id.clone(), tx });
        }
        PendingEcho { id, rx }
    }

    /// Resolve one slot with `event`. Returns `false` when the echo matched
    /// nothing and was dropped.
    ///
    /// Slots whose caller has dropped its [`PendingEcho`] are skipped, so a
    /// cancelled send never swallows an echo meant for a live one.
    pub fn resolve(&self, mut event: InboundEvent) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        prune(&mut slots);
        loop {
            let index = match (self.mode, event.correlation_id.as_deref()) {
                (CorrelationMode::Keyed, Some(id)) => slots.iter().position(|s| s.id == id),
                _ => slots.len().checked_sub(1),
            };
            let Some(i) = index else {
                debug!(
                    correlation_id = ?event.correlation_id,
                    pending = slots.len(),
                    "echo matched no pending send, dropped"
                );
                return false;
            };
            let slot = slots.remove(i);
            match slot.tx.send(event) {
                Ok(()) => return true,
                Err(returned) => {
                    debug!(id = %slot.id, "caller stopped waiting, trying next slot");
                    event = returned;
                }
            }
        }
    }

    /// Remove a slot whose frame was never written or whose caller gave up.
    pub fn cancel(&self, id: &str) -> bool {
        self.slots
            .lock()
            .map(|mut slots| {
                let before = slots.len();
                slots.retain(|s| s.id != id);
                slots.len() != before
            })
            .unwrap_or(false)
    }

    /// Drop every slot; their callers see [`BridgeError::ConnectionClosed`].
    pub fn abandon_all(&self) -> usize {
        self.slots
            .lock()
            .map(|mut slots| slots.drain(..).count())
            .unwrap_or(0)
    }

    /// Slots whose caller is still waiting.
    pub fn pending(&self) -> usize {
        self.slots
            .lock()
            .map(|mut slots| {
                prune(&mut slots);
                slots.len()
            })
            .unwrap_or(0)
    }
}

/// Forget slots whose [`PendingEcho`] was dropped.
fn prune(slots: &mut Vec<Slot>) {
    slots.retain(|s| !s.tx.is_closed());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
