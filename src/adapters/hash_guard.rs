//! Content-hash write suppression shared by the store adapters.
//!
//! Every write is preceded by an FNV-64a hash of the serialized payload;
//! a non-forced write whose hash equals the last committed value for that
//! key is skipped entirely.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Mutex;

use fnv::FnvHasher;

#[derive(Debug, Default)]
pub struct HashGuard {
    hashes: Mutex<HashMap<String, u64>>,
}

impl HashGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(payload: &str) -> u64 {
        let mut hasher = FnvHasher::default();
        hasher.write(payload.as_bytes());
        hasher.finish()
    }

    /// Decide whether a write should proceed. Returns the payload hash to
    /// pass to [`commit`](Self::commit) once the backend write succeeded,
    /// or `None` when the write is a suppressed no-op.
    pub fn should_write(&self, key: &str, payload: &str, force: bool) -> Option<u64> {
        let hash = Self::hash(payload);
        if !force {
            let hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
            if hashes.get(key) == Some(&hash) {
                return None;
            }
        }
        Some(hash)
    }

    pub fn commit(&self, key: &str, hash: u64) {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        hashes.insert(key.to_string(), hash);
    }

    pub fn forget(&self, key: &str) {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        hashes.remove(key);
    }

    pub fn forget_prefix(&self, prefix: &str) {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        let dir = format!("{prefix}/");
        hashes.retain(|k, _| k != prefix && !k.starts_with(&dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_payload_is_suppressed() {
        let guard = HashGuard::new();
        let hash = guard.should_write("/k", "{\"a\":1}", false).unwrap();
        guard.commit("/k", hash);
        assert!(guard.should_write("/k", "{\"a\":1}", false).is_none());
        assert!(guard.should_write("/k", "{\"a\":2}", false).is_some());
    }

    #[test]
    fn test_force_always_writes() {
        let guard = HashGuard::new();
        let hash = guard.should_write("/k", "{\"a\":1}", false).unwrap();
        guard.commit("/k", hash);
        assert!(guard.should_write("/k", "{\"a\":1}", true).is_some());
    }

    #[test]
    fn test_forget_clears_history() {
        let guard = HashGuard::new();
        let hash = guard.should_write("/k", "v", false).unwrap();
        guard.commit("/k", hash);
        guard.forget("/k");
        assert!(guard.should_write("/k", "v", false).is_some());
    }
}
