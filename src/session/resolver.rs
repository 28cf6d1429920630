use super::*;

use std::sync::Mutex;

/// Single-assignment slot for a poll cycle's [`SessionOutcome`].
///
/// Every resolution path (event handling, publishing, the deadline timer)
/// holds a clone and calls [`Resolver::resolve`]. Only the first call
/// delivers its outcome to the paired receiver; later calls are discarded and
/// return `false`.
#[derive(Debug, Clone)]
pub struct Resolver {
    slot: Arc<Mutex<Option<oneshot::Sender<SessionOutcome>>>>,
}

impl Resolver {
    /// Creates a resolver and the receiver that will yield its outcome.
    pub fn channel() -> (Self, oneshot::Receiver<SessionOutcome>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (resolver, rx)
    }

    /// Records `outcome` if nothing was recorded before.
    pub fn resolve(&self, outcome: SessionOutcome) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => {
                trace!("Resolving session: {}", outcome);
                if tx.send(outcome).is_err() {
                    debug!("Outcome receiver already dropped");
                }
                true
            }
            None => {
                debug!("Session already resolved, discarding {}", outcome);
                false
            }
        }
    }

    /// Returns true once an outcome has been recorded.
    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}
