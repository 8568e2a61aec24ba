// ── lidlink Atoms: Core Types ──────────────────────────────────────────────
// Plain data shared by every resolver layer. No I/O, no locking.

use crate::atoms::constants::{
    BROADCAST_SERVER, GROUP_SERVER, LEGACY_PHONE_SERVER, LID_SERVER, PHONE_SERVER,
};
use crate::atoms::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Identifier ─────────────────────────────────────────────────────────────

/// Which side of the correlation an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// Stable, portable address (phone-number shaped, digits only).
    Canonical,
    /// Opaque per-context token issued by the transport (`…@lid`).
    Pseudonymous,
}

/// A participant identifier in normalized form.
///
/// Canonical identifiers are stored as bare digit strings. Pseudonymous
/// identifiers keep their `@lid` server (or are non-numeric tokens), so the
/// kind is always recoverable from `raw` alone and is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    raw: String,
}

impl Identifier {
    /// Parse a transport address or bare id.
    ///
    /// `628113@s.whatsapp.net`, `628113@c.us`, `+62 811-3` → canonical `628113`.
    /// `8044492@lid` → pseudonymous `8044492@lid`. `lid1` → pseudonymous.
    /// Group and broadcast addresses are rejected.
    pub fn parse(input: &str) -> EngineResult<Self> {
        Self::parse_with_trunk(input, None)
    }

    /// Like [`Identifier::parse`], additionally rewriting a leading trunk `0`
    /// of a canonical number to `country_code`.
    pub fn parse_with_trunk(input: &str, country_code: Option<&str>) -> EngineResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidIdentifier("empty identifier".into()));
        }

        let (user, server) = match trimmed.split_once('@') {
            Some((u, s)) => (u, Some(s.to_ascii_lowercase())),
            None => (trimmed, None),
        };
        // Multi-device addresses carry `:<device>` after the user part.
        let user = user.split(':').next().unwrap_or(user).trim();
        if user.is_empty() {
            return Err(EngineError::InvalidIdentifier(trimmed.to_string()));
        }

        match server.as_deref() {
            Some(LID_SERVER) => Ok(Self { raw: format!("{}@{}", user, LID_SERVER) }),
            Some(PHONE_SERVER) | Some(LEGACY_PHONE_SERVER) | None => {
                let digits = strip_phone_punctuation(user);
                if is_all_digits(&digits) {
                    Ok(Self { raw: apply_trunk(digits, country_code) })
                } else if server.is_none() {
                    Ok(Self { raw: user.to_string() })
                } else {
                    Err(EngineError::InvalidIdentifier(trimmed.to_string()))
                }
            }
            Some(GROUP_SERVER) | Some(BROADCAST_SERVER) => Err(EngineError::InvalidIdentifier(
                format!("{} is not a participant address", trimmed),
            )),
            Some(other) => Err(EngineError::InvalidIdentifier(format!(
                "unknown server '{}' in {}",
                other, trimmed
            ))),
        }
    }

    pub fn kind(&self) -> IdKind {
        if is_all_digits(&self.raw) {
            IdKind::Canonical
        } else {
            IdKind::Pseudonymous
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.kind() == IdKind::Canonical
    }

    pub fn is_pseudonymous(&self) -> bool {
        self.kind() == IdKind::Pseudonymous
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Full transport address, e.g. `628113@s.whatsapp.net`.
    pub fn to_jid(&self) -> String {
        match self.kind() {
            IdKind::Canonical => format!("{}@{}", self.raw, PHONE_SERVER),
            IdKind::Pseudonymous => self.raw.clone(),
        }
    }
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_phone_punctuation(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')).collect()
}

fn apply_trunk(digits: String, country_code: Option<&str>) -> String {
    match (country_code, digits.strip_prefix('0')) {
        (Some(cc), Some(rest)) if !cc.is_empty() => format!("{}{}", cc, rest),
        _ => digits,
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Identifier {
    type Error = EngineError;

    fn try_from(value: String) -> EngineResult<Self> {
        Identifier::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.raw
    }
}

impl std::str::FromStr for Identifier {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        Identifier::parse(s)
    }
}

// ── Observations ───────────────────────────────────────────────────────────

/// Which transport event produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    Message,
    ContactEvent,
    GroupSnapshot,
}

/// "Identifier X was seen using display name N". Ephemeral: folded into
/// the name registry on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayNameObservation {
    pub identifier: Identifier,
    pub name: String,
    pub source: ObservationSource,
    pub observed_at: DateTime<Utc>,
}

impl DisplayNameObservation {
    pub fn new(identifier: Identifier, name: impl Into<String>, source: ObservationSource) -> Self {
        Self { identifier, name: name.into(), source, observed_at: Utc::now() }
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

// ── Mappings ───────────────────────────────────────────────────────────────

/// Evidence that produced a mapping, strongest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    ExactName,
    FuzzyName,
    GroupBackfill,
    Forced,
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingSource::ExactName => "exact-name",
            MappingSource::FuzzyName => "fuzzy-name",
            MappingSource::GroupBackfill => "group-backfill",
            MappingSource::Forced => "forced",
        };
        f.write_str(s)
    }
}

/// A confirmed pseudonymous ⇄ canonical correspondence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub pseudonymous: Identifier,
    pub canonical: Identifier,
    pub created_at: DateTime<Utc>,
    pub source: MappingSource,
}

// ── Pending contacts ───────────────────────────────────────────────────────

/// A canonical observation waiting for a pseudonymous counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingContact {
    pub canonical: Identifier,
    /// Normalized display name (latest observation wins).
    pub name: String,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub source: ObservationSource,
}

// ── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    pub total_mappings: usize,
    pub pending_contacts: usize,
    /// Distinct normalized names in the registry.
    pub total_names: usize,
    /// Distinct identifiers with at least one observed name.
    pub total_identifiers: usize,
    pub group_snapshots: CacheStats,
    pub participants: CacheStats,
    pub contacts: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_phone_jid_as_canonical() {
        let id = Identifier::parse("6281130569787@s.whatsapp.net").unwrap();
        assert_eq!(id.as_str(), "6281130569787");
        assert_eq!(id.kind(), IdKind::Canonical);
        assert_eq!(id.to_jid(), "6281130569787@s.whatsapp.net");
    }

    #[test]
    fn parses_legacy_and_device_suffixes() {
        let id = Identifier::parse("6281130569787:12@c.us").unwrap();
        assert_eq!(id.as_str(), "6281130569787");
    }

    #[test]
    fn numeric_lid_stays_pseudonymous() {
        let id = Identifier::parse("80444922015783@lid").unwrap();
        assert_eq!(id.as_str(), "80444922015783@lid");
        assert!(id.is_pseudonymous());
    }

    #[test]
    fn bare_tokens_classified_structurally() {
        assert!(Identifier::parse("lid1").unwrap().is_pseudonymous());
        assert!(Identifier::parse("111").unwrap().is_canonical());
        assert_eq!(Identifier::parse("+62 811-3056").unwrap().as_str(), "628113056");
    }

    #[test]
    fn trunk_prefix_rewritten_when_configured() {
        let id = Identifier::parse_with_trunk("08113056", Some("62")).unwrap();
        assert_eq!(id.as_str(), "628113056");
        let untouched = Identifier::parse("08113056").unwrap();
        assert_eq!(untouched.as_str(), "08113056");
    }

    #[test]
    fn rejects_group_and_garbage() {
        assert!(Identifier::parse("1203630@g.us").is_err());
        assert!(Identifier::parse("status@broadcast").is_err());
        assert!(Identifier::parse("   ").is_err());
        assert!(Identifier::parse("abc@s.whatsapp.net").is_err());
    }

    #[test]
    fn serde_uses_plain_string() {
        let id = Identifier::parse("80444922015783@lid").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"80444922015783@lid\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
