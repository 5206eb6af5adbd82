use parking_lot::Mutex;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Horloge injectable : le cache ne lit jamais l'heure système directement
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Cache à une entrée avec durée de vie.
/// Une entrée expire quand `now - stored_at >= ttl`.
pub struct TtlCache<T> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: Mutex<Option<(OffsetDateTime, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { clock, ttl, entry: Mutex::new(None) }
    }

    pub fn get(&self) -> Option<T> {
        let now = self.clock.now();
        let mut entry = self.entry.lock();
        let fresh = matches!(entry.as_ref(), Some((stored_at, _)) if now - *stored_at < self.ttl);
        if !fresh {
            *entry = None;
            return None;
        }
        entry.as_ref().map(|(_, value)| value.clone())
    }

    pub fn put(&self, value: T) {
        *self.entry.lock() = Some((self.clock.now(), value));
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }

    /// Âge de l'entrée courante, si présente
    pub fn age(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entry.lock().as_ref().map(|(stored_at, _)| now - *stored_at)
    }
}

/// Horloge manuelle pour les tests
#[cfg(test)]
pub struct ManualClock(Mutex<OffsetDateTime>);

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(time::macros::datetime!(2024-01-01 00:00 UTC)))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(clock: &Arc<ManualClock>, ttl_secs: i64) -> TtlCache<u32> {
        TtlCache::new(clock.clone(), Duration::seconds(ttl_secs))
    }

    #[test]
    fn test_get_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock, 30);
        assert_eq!(cache.get(), None);

        cache.put(7);
        clock.advance(Duration::seconds(29));
        assert_eq!(cache.get(), Some(7));
        assert_eq!(cache.age(), Some(Duration::seconds(29)));
    }

    #[test]
    fn test_expires_at_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock, 30);
        cache.put(7);
        clock.advance(Duration::seconds(30));
        assert_eq!(cache.get(), None);
        assert_eq!(cache.age(), None);
    }

    #[test]
    fn test_invalidate_and_replace() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock, 30);
        cache.put(1);
        cache.invalidate();
        assert_eq!(cache.get(), None);

        cache.put(2);
        clock.advance(Duration::seconds(10));
        cache.put(3);
        clock.advance(Duration::seconds(25));
        assert_eq!(cache.get(), Some(3));
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache(&clock, 0);
        cache.put(1);
        assert_eq!(cache.get(), None);
    }
}
