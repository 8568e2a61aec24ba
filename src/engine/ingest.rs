// lidlink Engine — Observation Ingest
//
// The three event shapes the transport hands us, as one tagged union, and
// the single function that turns them into display-name observations.
// Stateless: nothing here touches the registry.

use crate::atoms::types::{DisplayNameObservation, Identifier, ObservationSource};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

// ── Event shapes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    pub context_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpdate {
    pub identifier: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub identifier: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub context_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Message(MessageReceipt),
    ContactEvent(ContactUpdate),
    GroupSnapshot(GroupSnapshot),
}

impl Observation {
    pub fn source(&self) -> ObservationSource {
        match self {
            Observation::Message(_) => ObservationSource::Message,
            Observation::ContactEvent(_) => ObservationSource::ContactEvent,
            Observation::GroupSnapshot(_) => ObservationSource::GroupSnapshot,
        }
    }
}

// ── Normalization ──────────────────────────────────────────────────────

/// Turn one transport event into zero or more observations.
///
/// Self-originated messages and events without a display name carry no
/// counterparty evidence and produce nothing. Group snapshots expand into
/// one observation per named member.
pub fn normalize(
    observation: &Observation,
    at: DateTime<Utc>,
    trunk_country_code: Option<&str>,
) -> Vec<DisplayNameObservation> {
    let source = observation.source();
    let make = |raw: &str, name: Option<&String>| -> Option<DisplayNameObservation> {
        let name = name.map(|n| n.trim()).filter(|n| !n.is_empty())?;
        match Identifier::parse_with_trunk(raw, trunk_country_code) {
            Ok(identifier) => Some(DisplayNameObservation {
                identifier,
                name: name.to_string(),
                source,
                observed_at: at,
            }),
            Err(e) => {
                debug!("[lid:ingest] Skipping {}: {}", raw, e);
                None
            }
        }
    };

    match observation {
        Observation::Message(m) => {
            if m.is_self {
                return vec![];
            }
            make(&m.sender_id, m.display_name.as_ref()).into_iter().collect()
        }
        Observation::ContactEvent(c) => make(&c.identifier, c.display_name.as_ref()).into_iter().collect(),
        Observation::GroupSnapshot(g) => g
            .members
            .iter()
            .filter_map(|member| make(&member.identifier, member.display_name.as_ref()))
            .collect(),
    }
}
