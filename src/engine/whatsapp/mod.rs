// lidlink Engine — WhatsApp Transport (via Evolution API)
//
// Module layout:
//   evolution_api — EvolutionApi: GroupFetcher + ContactDirectory over reqwest
//   messages      — parse_webhook, group_snapshot_from_participants
//   webhook       — run_webhook_listener (raw TCP HTTP server)

pub mod evolution_api;
pub mod messages;
pub mod webhook;

pub use evolution_api::EvolutionApi;
pub use messages::{parse_webhook, WebhookAction};
pub use webhook::run_webhook_listener;
