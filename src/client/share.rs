use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::session::{Session, StoreError};

const SHARE_ID_LEN: usize = 10;

/// Key-value store for shared conversation snapshots.
pub trait ShareStore: Send + Sync {
    /// Store a snapshot and return its short share id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] when the session cannot be encoded.
    fn put(&self, session: &Session) -> Result<String, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::Serialization`] for a corrupt entry.
    fn get(&self, share_id: &str) -> Result<Session, StoreError>;
}

/// Keeps snapshots as serialized JSON, the way a remote key-value store would.
#[derive(Debug, Default)]
pub struct InMemoryShareStore {
    entries: RwLock<FxHashMap<String, String>>,
}

impl InMemoryShareStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn generate_share_id() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(SHARE_ID_LEN)
        .collect()
}

impl ShareStore for InMemoryShareStore {
    fn put(&self, session: &Session) -> Result<String, StoreError> {
        let encoded = serde_json::to_string(session)?;
        let mut entries = self.entries.write();
        let mut share_id = generate_share_id();
        while entries.contains_key(&share_id) {
            share_id = generate_share_id();
        }
        entries.insert(share_id.clone(), encoded);
        Ok(share_id)
    }

    fn get(&self, share_id: &str) -> Result<Session, StoreError> {
        let entries = self.entries.read();
        let encoded = entries
            .get(share_id)
            .ok_or_else(|| StoreError::NotFound(share_id.to_string()))?;
        Ok(serde_json::from_str(encoded)?)
    }
}
