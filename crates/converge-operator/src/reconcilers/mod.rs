// One reconciler per declared kind. Each observes its own kind only;
// cross-kind reads go through the RefResolver. All of them are
// level-triggered and idempotent.

pub mod agent;
pub mod prompt_pack;
pub mod provider;
pub mod retention;
pub mod tool_registry;
pub mod workspace;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use converge_storage::PolicyStore;
use kube::Client;
use parking_lot::{Mutex, RwLock};

use crate::metrics::{Diagnostics, Metrics};
use crate::resolver::RefResolver;

/// Requeue backoff cap for transient failures.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Per-object exponential backoff state, reset on success.
#[derive(Default)]
pub struct Backoff {
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    /// Delay for the next retry of `key`: 1s doubling, capped at 5 min.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = Duration::from_secs(1 << (*attempt).min(8));
        *attempt += 1;
        delay.min(MAX_BACKOFF)
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().remove(key);
    }
}

/// State shared by every reconciler.
pub struct Context {
    pub client: Client,
    pub resolver: Arc<dyn RefResolver>,
    pub metrics: Metrics,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Effective retention policies, shared with the retention sweeper
    pub policies: PolicyStore,
    pub backoff: Backoff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next_delay("agent/a"), Duration::from_secs(1));
        assert_eq!(backoff.next_delay("agent/a"), Duration::from_secs(2));
        assert_eq!(backoff.next_delay("agent/a"), Duration::from_secs(4));
        for _ in 0..12 {
            backoff.next_delay("agent/a");
        }
        assert_eq!(backoff.next_delay("agent/a"), MAX_BACKOFF);

        // Independent keys, and reset starts over
        assert_eq!(backoff.next_delay("agent/b"), Duration::from_secs(1));
        backoff.reset("agent/a");
        assert_eq!(backoff.next_delay("agent/a"), Duration::from_secs(1));
    }
}
