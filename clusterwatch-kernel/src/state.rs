//! État partagé entre les handlers HTTP et les tâches de fond.

use parking_lot::Mutex;
use std::sync::Arc;

/// Valeur partagée sous verrou court, jamais tenu à travers un `.await`
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    #[test]
    fn test_clones_see_updates() {
        let cfg = new_state(KernelConfig::default());
        let view = cfg.clone();
        cfg.lock().refresh.interval_secs = 5;
        assert_eq!(view.lock().refresh.interval_secs, 5);
    }
}
