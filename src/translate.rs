//! # Translation Collaborator
//!
//! The `Translator` seam consumed by the result pipeline, plus the Azure
//! Translator REST v3 client used in production. The pipeline treats the
//! three outcomes differently, so the trait keeps them apart:
//! - `Ok(Some(text))`: the service translated the utterance
//! - `Ok(None)`: the call succeeded but returned no usable translation
//! - `Err(_)`: the call itself failed (transport, auth, quota)

use crate::config::TranslationConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source` into `target` (two-letter codes).
    async fn translate(&self, text: &str, source: &str, target: &str)
        -> AppResult<Option<String>>;
}

/// Request body element for the Translator REST API.
#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

/// One element of the Translator response array.
#[derive(Debug, Deserialize)]
struct TranslationItem {
    #[serde(default)]
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
}

/// Azure Translator REST v3 client.
pub struct AzureTranslator {
    http: reqwest::Client,
    endpoint: String,
    key: String,
    region: String,
}

impl AzureTranslator {
    pub fn new(config: &TranslationConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Translation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            region: config.region.clone(),
        })
    }
}

#[async_trait]
impl Translator for AzureTranslator {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> AppResult<Option<String>> {
        let url = format!("{}/translate", self.endpoint);
        let body = vec![TranslateRequest { text }];

        let response = self
            .http
            .post(&url)
            .query(&[("api-version", "3.0"), ("from", source), ("to", target)])
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Ocp-Apim-Subscription-Region", &self.region)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Translation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Translation(format!(
                "translator returned {}: {}",
                status, detail
            )));
        }

        let items: Vec<TranslationItem> = response
            .json()
            .await
            .map_err(|e| AppError::Translation(format!("unreadable translator response: {}", e)))?;

        Ok(first_translation(items))
    }
}

/// Pull the first translation text out of a response, discarding empty
/// results so the pipeline can treat them as a failed translation.
fn first_translation(items: Vec<TranslationItem>) -> Option<String> {
    items
        .into_iter()
        .next()
        .and_then(|item| item.translations.into_iter().next())
        .map(|t| t.text)
        .filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_items(raw: &str) -> Vec<TranslationItem> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn response_parsing_takes_the_first_translation() {
        let items = parse_items(
            r#"[{"translations":[{"text":"hello world","to":"en"},{"text":"ignored","to":"en"}]}]"#,
        );
        assert_eq!(first_translation(items), Some("hello world".to_string()));
    }

    #[test]
    fn empty_translation_arrays_yield_none() {
        assert_eq!(first_translation(parse_items(r#"[]"#)), None);
        assert_eq!(
            first_translation(parse_items(r#"[{"translations":[]}]"#)),
            None
        );
    }

    #[test]
    fn blank_translation_text_counts_as_no_result() {
        let items = parse_items(r#"[{"translations":[{"text":"  ","to":"en"}]}]"#);
        assert_eq!(first_translation(items), None);
    }

    #[test]
    fn request_body_uses_the_service_field_name() {
        let body = serde_json::to_string(&vec![TranslateRequest { text: "halo" }]).unwrap();
        assert_eq!(body, r#"[{"Text":"halo"}]"#);
    }
}
