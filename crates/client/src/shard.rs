#![forbid(unsafe_code)]

use crate::support::now_secs;
use dray_core::ids::ShardId;
use dray_storage::{CoalescePref, ReplaceFault, ShardStore, StoreError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

const BACKOFF_START_SECONDS: i64 = 1;

/// Health bookkeeping for one shard. Pure state machine over explicit
/// instants so the schedule is testable without a real clock.
#[derive(Clone, Debug)]
pub struct ShardHealth {
    cap_seconds: i64,
    consecutive_failures: u32,
    retry_at: i64,
}

impl ShardHealth {
    pub fn new(cap_seconds: i64) -> Self {
        Self {
            cap_seconds: cap_seconds.max(BACKOFF_START_SECONDS),
            consecutive_failures: 0,
            retry_at: 0,
        }
    }

    pub fn is_available(&self, now: i64) -> bool {
        now >= self.retry_at
    }

    /// Window doubles per consecutive failure: 1 s, 2 s, 4 s, ... capped.
    pub fn record_failure(&mut self, now: i64) {
        let exponent = self.consecutive_failures.min(16);
        let window = (BACKOFF_START_SECONDS << exponent).min(self.cap_seconds);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.retry_at = now + window;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.retry_at = 0;
    }
}

/// One queue database plus the client-side state that rides along with it:
/// health/backoff, the funcname interning cache, the grab-time coalesce
/// affinity and the configured replace fault point.
#[derive(Debug)]
pub struct Shard {
    id: ShardId,
    weight: u32,
    store: Mutex<ShardStore>,
    health: Mutex<ShardHealth>,
    funcids: Mutex<HashMap<String, i64>>,
    affinity: Mutex<Option<CoalescePref>>,
    replace_fault: Option<ReplaceFault>,
}

impl Shard {
    pub(crate) fn new(
        id: ShardId,
        store: ShardStore,
        weight: u32,
        backoff_cap_seconds: i64,
        replace_fault: Option<ReplaceFault>,
    ) -> Self {
        Self {
            id,
            weight,
            store: Mutex::new(store),
            health: Mutex::new(ShardHealth::new(backoff_cap_seconds)),
            funcids: Mutex::new(HashMap::new()),
            affinity: Mutex::new(None),
            replace_fault,
        }
    }

    pub fn id(&self) -> &ShardId {
        &self.id
    }

    pub(crate) fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_available(&self, now: i64) -> bool {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_available(now)
    }

    pub(crate) fn replace_fault(&self) -> Option<ReplaceFault> {
        self.replace_fault
    }

    /// Run one store operation under the connection lock, folding the
    /// outcome into the health state: success resets the backoff, a
    /// transient error widens it.
    pub(crate) fn store<T>(
        &self,
        op: impl FnOnce(&mut ShardStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = {
            let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        };
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(_) => health.record_success(),
            Err(err) if err.is_transient() => {
                warn!(shard = %self.id, code = err.code(), "transient shard error, backing off");
                health.record_failure(now_secs());
            }
            Err(_) => {}
        }
        result
    }

    /// Resolve this shard's funcids for the given names, interning on first
    /// sight. Ids are shard-local, hence the per-shard cache.
    pub(crate) fn funcids_for(&self, funcnames: &[String]) -> Result<Vec<i64>, StoreError> {
        let mut out = Vec::with_capacity(funcnames.len());
        for name in funcnames {
            let cached = {
                let cache = self.funcids.lock().unwrap_or_else(PoisonError::into_inner);
                cache.get(name).copied()
            };
            if let Some(funcid) = cached {
                out.push(funcid);
                continue;
            }
            let funcid = self.store(|s| s.func_id(name))?;
            self.funcids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone(), funcid);
            out.push(funcid);
        }
        Ok(out)
    }

    pub(crate) fn func_name(&self, funcid: i64) -> Result<Option<String>, StoreError> {
        {
            let cache = self.funcids.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((name, _)) = cache.iter().find(|(_, id)| **id == funcid) {
                return Ok(Some(name.clone()));
            }
        }
        let name = self.store(|s| s.func_name(funcid))?;
        if let Some(name) = &name {
            self.funcids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone(), funcid);
        }
        Ok(name)
    }

    pub(crate) fn affinity(&self) -> Option<CoalescePref> {
        self.affinity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_affinity(&self, pref: Option<CoalescePref>) {
        *self.affinity.lock().unwrap_or_else(PoisonError::into_inner) = pref;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_window_doubles_and_caps() {
        let mut health = ShardHealth::new(60);
        assert!(health.is_available(100));

        health.record_failure(100);
        assert!(!health.is_available(100));
        assert!(health.is_available(101));

        health.record_failure(101);
        assert!(!health.is_available(102));
        assert!(health.is_available(103));

        health.record_failure(103);
        assert!(health.is_available(107));

        for tick in 0..20 {
            health.record_failure(200 + tick);
        }
        // Capped: never pushed further than retry_seconds past the failure.
        assert!(health.is_available(200 + 19 + 60));
        assert!(!health.is_available(200 + 19 + 59));
    }

    #[test]
    fn success_resets_backoff() {
        let mut health = ShardHealth::new(60);
        health.record_failure(100);
        health.record_failure(101);
        health.record_success();
        assert!(health.is_available(101));
        // The next failure starts over at the smallest window.
        health.record_failure(101);
        assert!(health.is_available(102));
    }
}
