// WhatsApp Bridge — Evolution API Client
// EvolutionApi: GroupFetcher (group participants) + ContactDirectory (findContacts)

use super::messages::group_snapshot_from_participants;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::Identifier;
use crate::engine::config::TransportConfig;
use crate::engine::ingest::GroupSnapshot;
use crate::engine::transport::{ContactDirectory, ContactRecord, GroupFetcher};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub struct EvolutionApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    instance_name: String,
}

impl EvolutionApi {
    pub fn new(config: &TransportConfig) -> Self {
        EvolutionApi {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            instance_name: config.instance_name.clone(),
        }
    }

    async fn read_json(context: &str, resp: reqwest::Response) -> EngineResult<Value> {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::transport(
                context,
                format!("{}: {}", status, text.chars().take(200).collect::<String>()),
            ));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl GroupFetcher for EvolutionApi {
    async fn fetch_group(&self, context_id: &str) -> EngineResult<GroupSnapshot> {
        let url = format!("{}/group/participants/{}", self.api_url, self.instance_name);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .query(&[("groupJid", context_id)])
            .send()
            .await?;
        let body = Self::read_json(context_id, resp).await?;
        let snapshot = group_snapshot_from_participants(context_id, &body);
        debug!("[whatsapp] Fetched {} participants for {}", snapshot.members.len(), context_id);
        Ok(snapshot)
    }
}

#[async_trait]
impl ContactDirectory for EvolutionApi {
    async fn lookup(&self, canonical: &Identifier) -> EngineResult<Option<ContactRecord>> {
        let url = format!("{}/chat/findContacts/{}", self.api_url, self.instance_name);
        let jid = canonical.to_jid();
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&json!({ "where": { "id": jid } }))
            .send()
            .await?;
        let body = Self::read_json(&jid, resp).await?;
        Ok(contact_from_response(canonical, &body))
    }
}

/// First contact in a findContacts response that carries a name.
pub(crate) fn contact_from_response(canonical: &Identifier, body: &Value) -> Option<ContactRecord> {
    let list = body.as_array()?;
    let contact = list.iter().find(|c| c["pushName"].as_str().is_some_and(|n| !n.trim().is_empty()))?;
    let display_name = contact["pushName"].as_str()?.trim().to_string();

    let mut attributes = BTreeMap::new();
    if let Some(pic) = contact["profilePicUrl"].as_str() {
        attributes.insert("profilePicUrl".to_string(), pic.to_string());
    }
    if list.len() > 1 {
        warn!("[whatsapp] findContacts returned {} rows for {}", list.len(), canonical);
    }
    Some(ContactRecord { canonical: canonical.clone(), display_name, attributes })
}
