//! Background reconfiguration loop.
//!
//! The loop waits on either the next interval tick or the stop signal; it
//! never polls. Each tick reloads the provider and merges the result into the
//! registry. Dropping the last gateway handle drops the stop sender, which
//! also ends the loop.

use crate::gateway::Core;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Handle to the reconfiguration task.
#[derive(Debug)]
pub struct ConfigSync {
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl ConfigSync {
    /// Start ticking every `period`, first tick one period from now.
    pub(crate) fn spawn(core: Arc<Core>, period: Duration) -> Self {
        let (tx, mut rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(target: "gatehouse::sync", period = ?period, "config sync started");
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        // failures are logged and reported inside refresh
                        let _ = core.refresh().await;
                    }
                }
            }
            debug!(target: "gatehouse::sync", "config sync stopped");
        });

        Self { stop: Mutex::new(Some(tx)) }
    }

    /// A handle with no task behind it.
    pub(crate) fn idle() -> Self {
        Self { stop: Mutex::new(None) }
    }

    /// Signal the loop to exit. Returns true only for the call that sent the
    /// signal; later calls are no-ops.
    pub fn stop(&self) -> bool {
        let sender = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            // the receiver may already be gone if the task ended
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// True until [`stop`](Self::stop) is called on a running loop.
    pub fn is_running(&self) -> bool {
        self.stop.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
