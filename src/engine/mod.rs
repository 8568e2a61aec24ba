// lidlink Engine — LID ⇄ phone number resolution
// Learns which pseudonymous WhatsApp identifiers (LIDs) belong to which
// phone numbers from display names seen on the wire, and serves lookups.
//
// Module layout:
//   config    — ResolverConfig (TOML file + env overrides)
//   ingest    — transport event shapes, normalize()
//   cache     — TtlCache, ResolverCaches
//   transport — GroupFetcher / ContactDirectory seams
//   http      — raw HTTP/1.1 request reader + JSON responses
//   identity  — IdentityEngine (registry, mappings, pending, persistence)
//   service   — single-writer actor: command queue, flush + sweep timers
//   whatsapp  — Evolution API fetcher, webhook listener
//   query     — HTTP query listener

pub mod cache;
pub mod config;
pub mod http;
pub mod identity;
pub mod ingest;
pub mod query;
pub mod service;
pub mod transport;
pub mod whatsapp;
