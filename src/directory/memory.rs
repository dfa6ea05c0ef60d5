//! In-process directory.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::PeerKeyDirectory;
use crate::error::Result;

/// Directory held in memory, shared by every engine that holds it
#[derive(Default)]
pub struct MemoryDirectory {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// The key currently published for `participant_id`
    pub fn get(&self, participant_id: &str) -> Option<Vec<u8>> {
        self.keys.read().get(participant_id).cloned()
    }

    /// Withdraw a participant's key
    pub fn remove(&self, participant_id: &str) -> bool {
        self.keys.write().remove(participant_id).is_some()
    }

    /// Number of published keys
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether nothing has been published
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl PeerKeyDirectory for MemoryDirectory {
    async fn fetch_public_key(&self, peer_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(peer_id))
    }

    async fn publish_public_key(&self, owner_id: &str, public_key: &[u8]) -> Result<()> {
        self.keys
            .write()
            .insert(owner_id.to_string(), public_key.to_vec());
        Ok(())
    }
}
