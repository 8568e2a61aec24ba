// lidlink Engine — Query HTTP Listener
//
// Read-mostly HTTP surface over IdentityEngine. Raw `tokio::net::TcpListener`
// bound to 127.0.0.1, one request per connection. Routes:
//   GET  /api/lid-resolver/resolve/:id        — LID → phone (phones echo back)
//        ?groupJid=                           — resolve as a participant of that
//                                               group, fetching members on a miss
//   GET  /api/lid-resolver/contact/:id        — directory record for a LID or phone
//   GET  /api/lid-resolver/reverse/:canonical — phone → LID
//   GET  /api/lid-resolver/names/:id          — every name seen for an identifier
//   GET  /api/lid-resolver/mappings?pushName= — identifiers sharing a name
//                                               (all mappings without pushName)
//   GET  /api/lid-resolver/pending            — canonical ids awaiting a LID
//   GET  /api/lid-resolver/stats              — counts + cache hit rates
//   POST /api/lid-resolver/force-mapping      — {lidJid, phoneJid, pushName?}

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::http::{read_request, send_json, HttpRequest};
use crate::engine::identity::IdentityEngine;
use crate::engine::transport::{ContactDirectory, GroupFetcher};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub const ROUTE_PREFIX: &str = "/api/lid-resolver";

/// What the listener needs to answer every route, including the ones that
/// reach out to the transport.
pub struct QueryContext {
    pub engine: Arc<IdentityEngine>,
    pub groups: Arc<dyn GroupFetcher>,
    pub directory: Arc<dyn ContactDirectory>,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceMappingRequest {
    lid_jid: String,
    phone_jid: String,
    #[serde(default)]
    push_name: Option<String>,
}

fn fail(status: u16, message: impl Into<String>) -> (u16, Value) {
    (status, json!({ "success": false, "error": message.into() }))
}

/// `(route, argument)` below the prefix.
fn split_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(ROUTE_PREFIX)?.trim_start_matches('/');
    Some(rest.split_once('/').unwrap_or((rest, "")))
}

/// Dispatch one request, consulting the transport for in-group resolution
/// and directory lookups. Everything else goes through [`route`].
pub async fn dispatch(ctx: &QueryContext, req: &HttpRequest) -> (u16, Value) {
    let Some((head, arg)) = split_route(&req.path) else {
        return fail(404, "not found");
    };
    match (req.method.as_str(), head, req.query.get("groupJid")) {
        ("GET", "resolve", Some(group)) if !arg.is_empty() => {
            let resolved = ctx
                .engine
                .resolve_in_context(group, arg, ctx.groups.as_ref(), ctx.fetch_timeout)
                .await;
            (200, json!({
                "success": true,
                "input": arg,
                "groupJid": group,
                "resolved": resolved.as_ref().map(|id| id.to_jid()),
            }))
        }
        ("GET", "contact", _) if !arg.is_empty() => {
            let contact = ctx.engine.lookup_contact(arg, ctx.directory.as_ref()).await;
            (200, json!({ "success": true, "identifier": arg, "contact": contact }))
        }
        _ => route(&ctx.engine, req),
    }
}

/// Dispatch one request against local state only. Pure apart from
/// `force-mapping`.
pub fn route(engine: &IdentityEngine, req: &HttpRequest) -> (u16, Value) {
    let Some((head, arg)) = split_route(&req.path) else {
        return fail(404, "not found");
    };

    match (req.method.as_str(), head) {
        ("GET", "resolve") if !arg.is_empty() => {
            let resolved = engine.resolve(arg);
            (200, json!({
                "success": true,
                "input": arg,
                "resolved": resolved.as_ref().map(|id| id.to_jid()),
                "kind": resolved.as_ref().map(|id| id.kind()),
            }))
        }
        ("GET", "reverse") if !arg.is_empty() => {
            let lid = engine.reverse_lookup(arg);
            (200, json!({
                "success": true,
                "canonical": arg,
                "pseudonymous": lid.map(|id| id.to_jid()),
            }))
        }
        ("GET", "names") if !arg.is_empty() => (200, json!({
            "success": true,
            "identifier": arg,
            "latest": engine.name_for_identifier(arg),
            "names": engine.names_for(arg),
        })),
        ("GET", "mappings") => match req.query.get("pushName") {
            Some(name) => {
                let entry = engine.identifiers_for_name(name);
                (200, json!({
                    "success": true,
                    "pushName": name,
                    "canonical": entry.canonical.iter().map(|id| id.to_jid()).collect::<Vec<_>>(),
                    "pseudonymous": entry.pseudonymous.iter().map(|id| id.to_jid()).collect::<Vec<_>>(),
                }))
            }
            None => (200, json!({ "success": true, "mappings": engine.mappings() })),
        },
        ("GET", "pending") => (200, json!({ "success": true, "pending": engine.pending_contacts() })),
        ("GET", "stats") => (200, json!({ "success": true, "stats": engine.stats() })),
        ("POST", "force-mapping") => {
            let body: ForceMappingRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(e) => return fail(400, format!("expected {{lidJid, phoneJid}}: {}", e)),
            };
            match engine.force_map(&body.lid_jid, &body.phone_jid, body.push_name.as_deref()) {
                Ok(mapping) => (200, json!({ "success": true, "mapping": mapping })),
                Err(e @ EngineError::InvalidIdentifier(_)) => fail(400, e.to_string()),
                Err(e) => fail(500, e.to_string()),
            }
        }
        ("GET", "resolve" | "reverse" | "names" | "contact") => fail(400, "identifier required"),
        (_, "resolve" | "reverse" | "names" | "contact" | "mappings" | "pending" | "stats" | "force-mapping") => {
            fail(405, format!("{} not allowed here", req.method))
        }
        _ => fail(404, "not found"),
    }
}

pub async fn run_query_listener(
    ctx: Arc<QueryContext>,
    port: u16,
    stop: Arc<AtomicBool>,
) -> EngineResult<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("Bind {} failed: {}", addr, e)))?;
    info!("[lid] Query API listening on http://{}{}", addr, ROUTE_PREFIX);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let accept = tokio::time::timeout(std::time::Duration::from_secs(1), listener.accept()).await;
        match accept {
            Ok(Ok((mut stream, peer))) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = serve(&ctx, &mut stream).await {
                        warn!("[lid] Query error from {}: {}", peer.ip(), e);
                    }
                });
            }
            Ok(Err(e)) => warn!("[lid] Accept error: {}", e),
            Err(_) => {} // timeout, check stop signal
        }
    }

    info!("[lid] Query API stopped");
    Ok(())
}

async fn serve(ctx: &QueryContext, stream: &mut TcpStream) -> EngineResult<()> {
    let Some(req) = read_request(stream).await? else {
        return Ok(());
    };
    let (status, body) = dispatch(ctx, &req).await;
    send_json(stream, status, &body).await
}
