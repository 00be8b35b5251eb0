// src/core/service/restart.rs

//! Delayed restart: a single one-shot background task that fires the
//! external restart hook after a grace delay.

use crate::core::NomadError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// The external server-lifecycle collaborator. Invoked off the caller's
/// stack once a scheduled restart comes due.
pub trait RestartHook: Send + Sync {
    fn restart(&self);
}

pub const MIN_RESTART_DELAY: Duration = Duration::from_secs(1);

pub struct DelayedRestarter {
    hook: Arc<dyn RestartHook>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedRestarter {
    pub fn new(hook: Arc<dyn RestartHook>) -> Self {
        Self {
            hook,
            pending: Mutex::new(None),
        }
    }

    /// Schedules one restart after `delay`. Delays under one second are
    /// refused, as is scheduling while a restart is already pending.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, delay: Duration) -> Result<(), NomadError> {
        if delay < MIN_RESTART_DELAY {
            return Err(NomadError::InvalidInput(format!(
                "Restart delay must be at least {MIN_RESTART_DELAY:?}, got {delay:?}"
            )));
        }
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(NomadError::InvalidInput(
                "A restart is already scheduled".to_string(),
            ));
        }
        let hook = self.hook.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Delayed restart firing after {:?}.", delay);
            hook.restart();
        }));
        info!("Restart scheduled in {:?}.", delay);
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}
