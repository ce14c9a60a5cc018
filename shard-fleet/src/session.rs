use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use tower::BoxError;

/// What a shard needs to resume its session instead of identifying again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub resume_url: String,
    /// Sequence number of the last event the shard received.
    pub sequence: u64,
    pub session_id: String,
    /// Total shard count when the shard identified.
    pub shard_count: u32,
    pub shard_id: u32,
}

/// Persistence hooks for [`SessionInfo`].
///
/// The fleet never looks inside the stored values; it hands the store to each
/// shard, which decides when to read and write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn retrieve(&self, shard_id: u32) -> Result<Option<SessionInfo>, BoxError>;

    /// Stores `info`, or forgets the session when `None`.
    async fn update(&self, shard_id: u32, info: Option<SessionInfo>) -> Result<(), BoxError>;
}

/// Keeps sessions in memory, so they survive reconnects but not restarts.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<u32, SessionInfo>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn retrieve(&self, shard_id: u32) -> Result<Option<SessionInfo>, BoxError> {
        Ok(self.sessions.get(&shard_id).map(|info| info.clone()))
    }

    async fn update(&self, shard_id: u32, info: Option<SessionInfo>) -> Result<(), BoxError> {
        match info {
            Some(info) => {
                self.sessions.insert(shard_id, info);
            }
            None => {
                self.sessions.remove(&shard_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(shard_id: u32) -> SessionInfo {
        SessionInfo {
            resume_url: "wss://resume.example".to_string(),
            sequence: 42,
            session_id: format!("session-{shard_id}"),
            shard_count: 2,
            shard_id,
        }
    }

    #[tokio::test]
    async fn sessions_round_trip_per_shard() {
        let store = MemorySessionStore::new();

        store.update(0, Some(session(0))).await.unwrap();
        store.update(1, Some(session(1))).await.unwrap();

        assert_eq!(store.retrieve(0).await.unwrap(), Some(session(0)));
        assert_eq!(store.retrieve(1).await.unwrap(), Some(session(1)));
        assert_eq!(store.retrieve(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn none_forgets_the_session() {
        let store = MemorySessionStore::new();
        store.update(0, Some(session(0))).await.unwrap();

        store.update(0, None).await.unwrap();

        assert_eq!(store.retrieve(0).await.unwrap(), None);
    }

    #[test]
    fn session_info_is_plain_json() {
        let json = serde_json::to_value(session(3)).unwrap();
        assert_eq!(json["session_id"], "session-3");
        assert_eq!(json["sequence"], 42);
    }
}
