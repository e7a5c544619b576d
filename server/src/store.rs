//! Expiring key-value persistence for session snapshots and image blobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use puzzlecoop_core::codec::{decode, encode};
use puzzlecoop_core::{Session, SessionId};
use thiserror::Error;

const SESSION_KEY_PREFIX: &str = "puzzle:session:";
const IMAGE_KEY_PREFIX: &str = "puzzle:image:";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt value under {key}")]
    Corrupt { key: String },
    #[error("failed to serialize value for {key}")]
    Serialize { key: String },
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;
    /// Pushes the expiry of an existing key out to `ttl` from now. Returns false when the
    /// key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.entries()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

pub fn session_key(id: &SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

pub fn image_key(image_id: &str) -> String {
    format!("{IMAGE_KEY_PREFIX}{image_id}")
}

/// Whole-session JSON snapshots, one key per session.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = session_key(id);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&bytes).map_err(|_| StoreError::Corrupt { key: key.clone() })?;
        decode::<Session>(text)
            .map(Some)
            .ok_or(StoreError::Corrupt { key })
    }

    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let key = session_key(&session.id);
        let text = encode(session).ok_or_else(|| StoreError::Serialize { key: key.clone() })?;
        self.store.put(&key, text.into_bytes(), self.ttl)
    }

    pub fn touch(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.store.expire(&session_key(id), self.ttl)
    }
}

#[derive(Clone)]
pub struct ImageRepository {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ImageRepository {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn save(&self, image_id: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.store.put(&image_key(image_id), bytes, self.ttl)
    }

    pub fn load(&self, image_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get(&image_key(image_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .put("short", b"a".to_vec(), Duration::from_millis(20))
            .unwrap();
        store
            .put("long", b"b".to_vec(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(store.get("short").unwrap(), Some(b"a".to_vec()));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("short").unwrap(), None);
        assert!(!store.expire("short", Duration::from_secs(60)).unwrap());
        assert_eq!(store.get("long").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn expire_extends_live_keys() {
        let store = MemoryStore::new();
        store
            .put("k", b"v".to_vec(), Duration::from_millis(30))
            .unwrap();
        assert!(store.expire("k", Duration::from_secs(60)).unwrap());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(!store.expire("missing", Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = MemoryStore::new();
        store.put("a", vec![1], Duration::from_millis(1)).unwrap();
        store.put("b", vec![2], Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        store.delete("b").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let id = SessionId::generate();
        store
            .put(&session_key(&id), b"{not json".to_vec(), Duration::from_secs(5))
            .unwrap();
        let repo = SessionRepository::new(store, Duration::from_secs(5));
        assert!(matches!(repo.load(&id), Err(StoreError::Corrupt { .. })));
        assert!(repo.load(&SessionId::generate()).unwrap().is_none());
    }

    #[test]
    fn keys_are_namespaced() {
        let id = SessionId::parse("abcdefABCDEF").unwrap();
        assert_eq!(session_key(&id), "puzzle:session:abcdefABCDEF");
        assert_eq!(image_key("xyz"), "puzzle:image:xyz");
    }
}
