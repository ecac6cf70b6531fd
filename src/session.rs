//! Per-tenant chat session store
//!
//! Chat context is never kept in ad-hoc process globals: whatever needs
//! session state receives a [`SessionStore`] and asks for it by tenant id.
//! The in-memory implementation here serves single-process deployments and
//! tests; a durable implementation belongs to the document-database
//! collaborator and plugs in behind the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Number of most recent turns handed to the agent as context
pub const HISTORY_WINDOW: usize = 5;

/// Upper bound on turns retained per tenant
const MAX_STORED_TURNS: usize = 50;

/// One user/assistant exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// What the user sent
    pub user: String,
    /// What the agent answered
    pub assistant: String,
}

/// Session state for one tenant
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionRecord {
    /// Pod most recently resolved for the tenant's workload
    pub pod_name: Option<String>,
    /// Stable Service URL of the tenant's agent
    pub service_url: Option<String>,
    /// Conversation turns, oldest first
    pub turns: Vec<Turn>,
}

/// Store interface for per-tenant session state, keyed by tenant id
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a tenant's session, if any
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>>;

    /// Record the workload resolved by a deploy
    async fn record_workload(
        &self,
        tenant_id: &str,
        pod_name: &str,
        service_url: &str,
    ) -> Result<()>;

    /// Append one completed exchange to a tenant's history
    async fn append_turn(&self, tenant_id: &str, turn: Turn) -> Result<()>;

    /// The most recent `limit` turns, oldest first
    async fn recent_turns(&self, tenant_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Drop a tenant's session entirely
    async fn clear(&self, tenant_id: &str) -> Result<()>;
}

/// In-memory session store
///
/// State does not survive a process restart; only the conversation
/// context window is lost, since the workload itself is re-resolvable
/// from the cluster at any time.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().unwrap().get(tenant_id).cloned())
    }

    async fn record_workload(
        &self,
        tenant_id: &str,
        pod_name: &str,
        service_url: &str,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap();
        let record = sessions.entry(tenant_id.to_string()).or_default();
        record.pod_name = Some(pod_name.to_string());
        record.service_url = Some(service_url.to_string());
        Ok(())
    }

    async fn append_turn(&self, tenant_id: &str, turn: Turn) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap();
        let record = sessions.entry(tenant_id.to_string()).or_default();
        record.turns.push(turn);
        if record.turns.len() > MAX_STORED_TURNS {
            let excess = record.turns.len() - MAX_STORED_TURNS;
            record.turns.drain(..excess);
        }
        Ok(())
    }

    async fn recent_turns(&self, tenant_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().unwrap();
        let turns = sessions
            .get(tenant_id)
            .map(|record| {
                let skip = record.turns.len().saturating_sub(limit);
                record.turns[skip..].to_vec()
            })
            .unwrap_or_default();
        Ok(turns)
    }

    async fn clear(&self, tenant_id: &str) -> Result<()> {
        self.sessions.write().unwrap().remove(tenant_id);
        Ok(())
    }
}
