// WhatsApp Bridge — Webhook Payload Parsing
// parse_webhook, group_snapshot_from_participants
//
// Pure translation from Evolution API JSON into resolver inputs. Nothing
// here does I/O, so every payload shape is covered by unit tests.

use crate::engine::ingest::{ContactUpdate, GroupMember, GroupSnapshot, MessageReceipt, Observation};
use serde_json::Value;

/// What the webhook listener should do with one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Observe(Observation),
    /// Membership changed; re-fetch this group.
    RefreshGroup(String),
}

/// `data` may be a single object or an array of them.
fn items(data: &Value) -> Vec<&Value> {
    match data.as_array() {
        Some(arr) => arr.iter().collect(),
        None if data.is_object() => vec![data],
        None => vec![],
    }
}

fn display_name(v: &Value) -> Option<String> {
    ["pushName", "verifiedBizName", "notify", "name"]
        .iter()
        .filter_map(|k| v[*k].as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn is_group(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

pub fn parse_webhook(payload: &Value) -> Vec<WebhookAction> {
    let event = payload["event"].as_str().unwrap_or("");
    let data = &payload["data"];

    match event {
        "messages.upsert" => items(data).into_iter().flat_map(message_actions).collect(),
        "contacts.update" | "contacts.upsert" => items(data)
            .into_iter()
            .filter_map(|c| {
                let id = c["id"].as_str().or_else(|| c["remoteJid"].as_str())?;
                if is_group(id) {
                    return None;
                }
                Some(WebhookAction::Observe(Observation::ContactEvent(ContactUpdate {
                    identifier: id.to_string(),
                    display_name: display_name(c),
                })))
            })
            .collect(),
        "groups.upsert" | "groups.update" => items(data)
            .into_iter()
            .filter_map(|g| g["id"].as_str())
            .map(|id| WebhookAction::RefreshGroup(id.to_string()))
            .collect(),
        "group-participants.update" => data["id"]
            .as_str()
            .map(|id| vec![WebhookAction::RefreshGroup(id.to_string())])
            .unwrap_or_default(),
        _ => vec![],
    }
}

fn message_actions(msg: &Value) -> Vec<WebhookAction> {
    let key = &msg["key"];
    let Some(remote_jid) = key["remoteJid"].as_str() else {
        return vec![];
    };
    if remote_jid == "status@broadcast" {
        return vec![];
    }
    let sender = match key["participant"].as_str() {
        Some(p) if !p.is_empty() => p,
        _ if is_group(remote_jid) => return vec![],
        _ => remote_jid,
    };

    let mut out = vec![WebhookAction::Observe(Observation::Message(MessageReceipt {
        context_id: remote_jid.to_string(),
        sender_id: sender.to_string(),
        is_self: key["fromMe"].as_bool().unwrap_or(false),
        display_name: display_name(msg),
    }))];

    // Quoted replies carry the quoted author's id and, sometimes, their name.
    let ctx = msg["message"]
        .as_object()
        .and_then(|m| m.values().find_map(|v| v.get("contextInfo")))
        .or_else(|| msg.get("contextInfo"));
    if let Some(ctx) = ctx {
        if let (Some(participant), Some(name)) = (ctx["participant"].as_str(), display_name(ctx)) {
            out.push(WebhookAction::Observe(Observation::Message(MessageReceipt {
                context_id: remote_jid.to_string(),
                sender_id: participant.to_string(),
                is_self: false,
                display_name: Some(name),
            })));
        }
    }
    out
}

/// Build a snapshot from a participants response: either
/// `{"participants":[...]}` or a bare array.
pub fn group_snapshot_from_participants(context_id: &str, resp: &Value) -> GroupSnapshot {
    let list = resp["participants"].as_array().or_else(|| resp.as_array());
    let members = list
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    let id = p["id"].as_str()?;
                    Some(GroupMember { identifier: id.to_string(), display_name: display_name(p) })
                })
                .collect()
        })
        .unwrap_or_default();
    GroupSnapshot {
        context_id: context_id.to_string(),
        subject: resp["subject"].as_str().map(String::from),
        members,
    }
}
