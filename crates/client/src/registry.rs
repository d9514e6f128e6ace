#![forbid(unsafe_code)]

use crate::error::ClientError;
use crate::worker::Worker;
use dray_core::ids::validate_funcname;
use std::collections::HashMap;
use std::sync::Arc;

/// Funcname → descriptor mapping. Registration order is preserved because
/// grab walks the allowed funcnames in the order they were declared.
#[derive(Clone, Default)]
pub struct AbilityRegistry {
    order: Vec<String>,
    by_funcname: HashMap<String, Arc<dyn Worker>>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` under an explicit funcname. Re-registering a name
    /// replaces the previous descriptor and keeps its original position.
    pub fn can(&mut self, funcname: &str, worker: Arc<dyn Worker>) -> Result<(), ClientError> {
        validate_funcname(funcname).map_err(|_| ClientError::InvalidInput("funcname is invalid"))?;
        if !self.by_funcname.contains_key(funcname) {
            self.order.push(funcname.to_string());
        }
        self.by_funcname.insert(funcname.to_string(), worker);
        Ok(())
    }

    /// Register `worker` under every funcname it handles.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Result<(), ClientError> {
        for funcname in worker.handles() {
            self.can(&funcname, worker.clone())?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.order.clear();
        self.by_funcname.clear();
    }

    pub fn get(&self, funcname: &str) -> Option<Arc<dyn Worker>> {
        self.by_funcname.get(funcname).cloned()
    }

    pub fn funcnames(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::worker::WorkError;

    struct Noop(&'static str);

    impl Worker for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn grab_for(&self) -> i64 {
            60
        }

        fn work(&self, _job: &mut Job) -> Result<(), WorkError> {
            Ok(())
        }
    }

    struct Multi;

    impl Worker for Multi {
        fn name(&self) -> &str {
            "multi"
        }

        fn handles(&self) -> Vec<String> {
            vec!["multi".to_string(), "multi_legacy".to_string()]
        }

        fn grab_for(&self) -> i64 {
            60
        }

        fn work(&self, _job: &mut Job) -> Result<(), WorkError> {
            Ok(())
        }
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = AbilityRegistry::new();
        registry.can("beta", Arc::new(Noop("beta"))).expect("can");
        registry.can("alpha", Arc::new(Noop("alpha"))).expect("can");
        registry.can("beta", Arc::new(Noop("beta"))).expect("re-can");
        assert_eq!(registry.funcnames(), vec!["beta", "alpha"]);
    }

    #[test]
    fn register_covers_all_handles() {
        let mut registry = AbilityRegistry::new();
        registry.register(Arc::new(Multi)).expect("register");
        assert!(registry.get("multi").is_some());
        assert!(registry.get("multi_legacy").is_some());
        registry.reset();
        assert!(registry.is_empty());
    }

    #[test]
    fn rejects_invalid_funcname() {
        let mut registry = AbilityRegistry::new();
        let err = registry
            .can("", Arc::new(Noop("x")))
            .expect_err("expected invalid funcname");
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
