// WhatsApp Bridge — Webhook HTTP Listener
// run_webhook_listener

use super::messages::{parse_webhook, WebhookAction};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::http::{read_request, send_json};
use crate::engine::service::ResolverHandle;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Minimal HTTP listener that receives webhooks from Evolution API.
/// Bound to 127.0.0.1; every accepted payload is answered 200 straight away
/// and its observations are queued on the resolver service.
pub async fn run_webhook_listener(
    handle: ResolverHandle,
    port: u16,
    stop: Arc<AtomicBool>,
) -> EngineResult<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("Failed to bind webhook listener on {}: {}", addr, e)))?;

    info!("[whatsapp] Webhook listener started on {}", addr);

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let accept = tokio::time::timeout(std::time::Duration::from_secs(2), listener.accept()).await;
        let (stream, _peer) = match accept {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("[whatsapp] Accept error: {}", e);
                continue;
            }
            Err(_) => continue, // check stop signal
        };

        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_webhook(stream, &handle).await {
                warn!("[whatsapp] Webhook error: {}", e);
            }
        });
    }

    info!("[whatsapp] Webhook listener stopped");
    Ok(())
}

async fn handle_webhook(mut stream: TcpStream, handle: &ResolverHandle) -> EngineResult<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    // Evolution expects a quick response
    send_json(&mut stream, 200, &json!({ "ok": true })).await?;
    drop(stream);

    if request.method != "POST" {
        return Ok(());
    }
    let payload: serde_json::Value = match serde_json::from_slice(&request.body) {
        Ok(v) => v,
        Err(e) => {
            debug!("[whatsapp] Ignoring non-JSON webhook body: {}", e);
            return Ok(());
        }
    };

    for action in parse_webhook(&payload) {
        match action {
            WebhookAction::Observe(observation) => handle.observe(observation).await?,
            WebhookAction::RefreshGroup(context_id) => handle.refresh_group(context_id).await?,
        }
    }
    Ok(())
}
