// ── lidlink Atoms: Constants ───────────────────────────────────────────────
// Named constants shared by the resolver layers. Config defaults are built
// from these; runtime code reads the config, not the constants.

// ── Transport address servers ─────────────────────────────────────────────
pub const LID_SERVER: &str = "lid";
pub const PHONE_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_PHONE_SERVER: &str = "c.us";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";

// ── Correlation ──────────────────────────────────────────────────────────
/// Minimum normalized Levenshtein similarity for a fuzzy name match.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

// ── Pending contacts ─────────────────────────────────────────────────────
pub const PENDING_RETENTION_SECS: u64 = 24 * 60 * 60;
pub const PENDING_SWEEP_INTERVAL_SECS: u64 = 30 * 60;

// ── Cache TTLs ───────────────────────────────────────────────────────────
// Membership churns (join/leave) so snapshots stay short-lived; resolved
// mappings rarely change once established.
pub const GROUP_SNAPSHOT_TTL_SECS: u64 = 5 * 60;
pub const PARTICIPANT_TTL_SECS: u64 = 30 * 60;
pub const CONTACT_TTL_SECS: u64 = 60 * 60;

// ── Persistence ──────────────────────────────────────────────────────────
pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE_NAME: &str = "lid_phone_mappings.json";
pub const FLUSH_INTERVAL_SECS: u64 = 5 * 60;

// ── Backfill ─────────────────────────────────────────────────────────────
pub const BACKFILL_TIMEOUT_SECS: u64 = 10;

// ── Service ──────────────────────────────────────────────────────────────
/// Bound on queued observations before webhook handlers apply backpressure.
pub const SERVICE_QUEUE_DEPTH: usize = 1024;
