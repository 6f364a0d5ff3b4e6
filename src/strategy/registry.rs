use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Strategy, StrategyInfo};
use crate::error::{Error, Result};

/// Thread-safe name → strategy map.
///
/// Registration is exclusive and rejects duplicate ids; lookup, list, and
/// metadata reads take the shared lock. The registry starts empty until
/// boot code registers strategies explicitly. List order is not defined.
#[derive(Default)]
pub struct StrategyRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Strategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let id = strategy.id().to_string();
        if id.trim().is_empty() {
            return Err(Error::validation("strategy id is empty"));
        }
        let mut map = self.inner.write();
        if map.contains_key(&id) {
            return Err(Error::conflict(format!(
                "strategy already registered: {id}"
            )));
        }
        map.insert(id, strategy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        self.inner.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<StrategyInfo> {
        self.inner.read().values().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::rsi_momentum::RsiMomentum;

    #[test]
    fn register_then_get_returns_instance() {
        let registry = StrategyRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(RsiMomentum)).unwrap();
        assert_eq!(registry.len(), 1);
        let found = registry.get(RsiMomentum.id()).unwrap();
        assert_eq!(found.id(), RsiMomentum.id());
    }

    #[test]
    fn duplicate_registration_rejected_and_registry_unchanged() {
        let registry = StrategyRegistry::new();
        registry.register(Arc::new(RsiMomentum)).unwrap();
        let before = registry.len();
        let err = registry.register(Arc::new(RsiMomentum)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn unknown_lookup_returns_none() {
        let registry = StrategyRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn list_exposes_metadata() {
        let registry = StrategyRegistry::new();
        registry.register(Arc::new(RsiMomentum)).unwrap();
        let infos = registry.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, RsiMomentum.id());
        assert!(!infos[0].name.is_empty());
    }

    #[test]
    fn concurrent_readers_do_not_block_each_other() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(Arc::new(RsiMomentum)).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(reg.get("rsi_momentum_v1").is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
