use crate::common::*;

/// Memoizes one expensive computation per key.
///
/// Concurrent requests for the same key wait for the first one to finish
/// and then share its result; failures are stored like successes.
pub struct ArtifactCache<K, V> {
    entries: Mutex<HashMap<K, Arc<Mutex<Option<V>>>>>,
}

impl<K: Eq + std::hash::Hash + Clone, V: Clone> ArtifactCache<K, V> {
    pub fn new() -> Self {
        ArtifactCache { entries: Mutex::new(HashMap::new()) }
    }
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get_or_compute<F: FnOnce() -> V>(&self, key: &K, compute: F) -> V {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
        };
        // the map lock is released here; only requests for this key block below
        let mut slot = entry.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Some(value) => value.clone(),
            None => {
                let value = compute();
                *slot = Some(value.clone());
                value
            }
        }
    }
}

impl<K: Eq + std::hash::Hash + Clone, V: Clone> Default for ArtifactCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    #[test]
    fn computes_once_per_key() {
        let cache: ArtifactCache<String, Result<u32, String>> = ArtifactCache::new();
        let computed = AtomicUsize::new(0);
        crossbeam_utils::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    let value = cache.get_or_compute(&"solution.cpp".to_owned(), || {
                        computed.fetch_add(1, SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok(7)
                    });
                    assert_eq!(value, Ok(7));
                });
            }
        })
        .unwrap();
        assert_eq!(computed.load(SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_cached() {
        let cache: ArtifactCache<u8, Result<u32, String>> = ArtifactCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_compute(&1, || Err("syntax error".into())), Err("syntax error".into()));
        assert_eq!(cache.get_or_compute(&1, || Ok(3)), Err("syntax error".into()));
        assert_eq!(cache.get_or_compute(&2, || Ok(3)), Ok(3));
        assert_eq!(cache.len(), 2);
    }
}
