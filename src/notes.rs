//! # Note Archival Collaborator
//!
//! Posts one archival record per finalized utterance to the remote
//! note-taking service. The call is bounded by a fixed timeout and its
//! failures stop here: the caller receives a typed error to log and count,
//! never a fault that could reach the connection loop.

use crate::config::NotesConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// JSON body expected by the notes endpoint.
#[derive(Debug, Serialize)]
struct NotePayload<'a> {
    text: &'a str,
    #[serde(rename = "deviceId")]
    device_id: &'a str,
}

#[async_trait]
pub trait NoteArchive: Send + Sync {
    /// Archive one record. Returns the endpoint's response body on 2xx.
    async fn post_note(&self, text: &str, device_id: &str) -> AppResult<String>;
}

/// HTTP client for the configured notes endpoint.
pub struct NotesClient {
    http: reqwest::Client,
    url: String,
}

impl NotesClient {
    pub fn new(config: &NotesConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| AppError::Archival(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl NoteArchive for NotesClient {
    async fn post_note(&self, text: &str, device_id: &str) -> AppResult<String> {
        let payload = NotePayload { text, device_id };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(AppError::from)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(AppError::Archival(format!(
                "notes endpoint returned {}: {}",
                status, body
            )));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_the_endpoint_contract() {
        let payload = NotePayload {
            text: "(ID): halo dunia (EN): hello world",
            device_id: "AA:BB:CC:DD:EE:FF",
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["text"], "(ID): halo dunia (EN): hello world");
        assert_eq!(json["deviceId"], "AA:BB:CC:DD:EE:FF");
        assert!(json.get("device_id").is_none());
    }
}
