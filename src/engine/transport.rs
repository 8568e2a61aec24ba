// lidlink Engine — External Collaborator Seams
//
//   GroupFetcher     — fetches a group's current membership from the transport
//   ContactDirectory — looks up directory metadata for a canonical number
//
// The resolver only depends on these traits; the Evolution API bridge and
// tests provide implementations.

use crate::atoms::error::EngineResult;
use crate::atoms::types::Identifier;
use crate::engine::ingest::GroupSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[async_trait]
pub trait GroupFetcher: Send + Sync {
    async fn fetch_group(&self, context_id: &str) -> EngineResult<GroupSnapshot>;
}

/// Directory metadata about a person (e.g. a technician roster entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub canonical: Identifier,
    pub display_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn lookup(&self, canonical: &Identifier) -> EngineResult<Option<ContactRecord>>;
}
