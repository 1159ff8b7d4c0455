//! # Result Pipeline
//!
//! Turns one finalized utterance into the message delivered back to the
//! device and the record archived to the note service. Runs on a spawned
//! task per utterance, never on the engine's execution context and never
//! blocking audio ingestion.
//!
//! ## Guarantees:
//! - The device always receives either a real translation or one of the
//!   fixed status strings; never nothing, never a raw error trace.
//! - Delivery and archival are independent side effects: the connection
//!   handler fires the reply before awaiting `archive`, and an archival
//!   failure cannot retract a delivered reply.
//! - The pipeline's own success, for logging and the session's
//!   `last_result_ok`, is the archival call's success.

use crate::config::TranslationConfig;
use crate::notes::NoteArchive;
use crate::translate::Translator;
use std::sync::Arc;
use tracing::{error, info};

/// Fixed status strings delivered when no translation is available.
pub const STATUS_TRANSLATION_FAILED: &str = "Translation Failed";
pub const STATUS_TRANSLATION_ERROR: &str = "Translation Error";
pub const STATUS_TRANSLATOR_OFF: &str = "Translator Off";

/// What one finalized utterance turns into.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Plain-text message for the device, if any.
    pub reply: Option<String>,

    /// Archival record text, if any.
    pub note: Option<String>,
}

impl Utterance {
    fn empty() -> Self {
        Self {
            reply: None,
            note: None,
        }
    }
}

/// Per-process pipeline shared by all sessions. Stateless apart from the
/// collaborator handles, so concurrent use from many sessions is safe.
pub struct ResultPipeline {
    translator: Option<Arc<dyn Translator>>,
    notes: Arc<dyn NoteArchive>,
    source: String,
    target: String,
}

impl ResultPipeline {
    /// `translator` is `None` when no translation key is configured; every
    /// utterance then takes the "Translator Off" path.
    pub fn new(
        translator: Option<Arc<dyn Translator>>,
        notes: Arc<dyn NoteArchive>,
        config: &TranslationConfig,
    ) -> Self {
        Self {
            translator,
            notes,
            source: config.source.clone(),
            target: config.target.clone(),
        }
    }

    /// Run the translation step and decide both outputs.
    ///
    /// An empty recognition is a logged no-op: no delivery, no archival.
    pub async fn evaluate(&self, text: &str, device_tag: &str) -> Utterance {
        if text.is_empty() {
            info!(device = %device_tag, "Recognized empty text, nothing to relay");
            return Utterance::empty();
        }

        info!(device = %device_tag, text = %text, "Recognized utterance");

        let translator = match &self.translator {
            Some(translator) => translator,
            None => {
                return Utterance {
                    reply: Some(STATUS_TRANSLATOR_OFF.to_string()),
                    note: Some(format!(
                        "Device {} ({} - No Translator): {}",
                        device_tag,
                        self.source_label(),
                        text
                    )),
                };
            }
        };

        match translator.translate(text, &self.source, &self.target).await {
            Ok(Some(translated)) if !translated.is_empty() => {
                info!(device = %device_tag, translated = %translated, "Translated utterance");
                Utterance {
                    reply: Some(translated.clone()),
                    note: Some(format!(
                        "({}): {} ({}): {}",
                        self.source_label(),
                        text,
                        self.target_label(),
                        translated
                    )),
                }
            }
            Ok(_) => {
                error!(device = %device_tag, "Translation response was empty");
                Utterance {
                    reply: Some(STATUS_TRANSLATION_FAILED.to_string()),
                    note: Some(format!(
                        "Device {} ({} - Translation Failed): {}",
                        device_tag,
                        self.source_label(),
                        text
                    )),
                }
            }
            Err(err) => {
                error!(device = %device_tag, error = %err, "Translation call failed");
                Utterance {
                    reply: Some(STATUS_TRANSLATION_ERROR.to_string()),
                    note: Some(format!(
                        "Device {} ({} - Translation Error): {}",
                        device_tag,
                        self.source_label(),
                        text
                    )),
                }
            }
        }
    }

    /// Archive one record. Returns whether the call succeeded; failures
    /// are logged here and reported no further.
    pub async fn archive(&self, note: &str, device_tag: &str) -> bool {
        match self.notes.post_note(note, device_tag).await {
            Ok(body) => {
                info!(device = %device_tag, response = %body, "Note archived");
                true
            }
            Err(err) => {
                error!(device = %device_tag, error = %err, "Failed to archive note");
                false
            }
        }
    }

    fn source_label(&self) -> String {
        self.source.to_uppercase()
    }

    fn target_label(&self) -> String {
        self.target.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::{AppError, AppResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Translator double with a scripted outcome.
    enum MockTranslation {
        Text(String),
        Empty,
        Fail,
    }

    struct MockTranslator {
        outcome: MockTranslation,
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(
            &self,
            _text: &str,
            _source: &str,
            _target: &str,
        ) -> AppResult<Option<String>> {
            match &self.outcome {
                MockTranslation::Text(text) => Ok(Some(text.clone())),
                MockTranslation::Empty => Ok(None),
                MockTranslation::Fail => Err(AppError::Translation("boom".to_string())),
            }
        }
    }

    /// Archive double that records every call.
    struct MockArchive {
        succeed: bool,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockArchive {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NoteArchive for MockArchive {
        async fn post_note(&self, text: &str, device_id: &str) -> AppResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), device_id.to_string()));
            if self.succeed {
                Ok("ok".to_string())
            } else {
                Err(AppError::Archival("timed out".to_string()))
            }
        }
    }

    fn pipeline(
        translator: Option<MockTranslation>,
        archive: Arc<MockArchive>,
    ) -> ResultPipeline {
        let config = AppConfig::default().translation;
        ResultPipeline::new(
            translator.map(|outcome| Arc::new(MockTranslator { outcome }) as Arc<dyn Translator>),
            archive,
            &config,
        )
    }

    const TAG: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test]
    async fn translated_text_is_delivered_and_archived_with_both_strings() {
        let archive = MockArchive::new(true);
        let pipeline = pipeline(
            Some(MockTranslation::Text("hello world".to_string())),
            archive.clone(),
        );

        let utterance = pipeline.evaluate("halo dunia", TAG).await;
        assert_eq!(utterance.reply.as_deref(), Some("hello world"));

        let note = utterance.note.unwrap();
        assert!(note.contains("halo dunia"));
        assert!(note.contains("hello world"));

        assert!(pipeline.archive(&note, TAG).await);
        let calls = archive.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, TAG);
    }

    #[tokio::test]
    async fn translation_error_delivers_the_fixed_status_and_still_archives() {
        let archive = MockArchive::new(true);
        let pipeline = pipeline(Some(MockTranslation::Fail), archive.clone());

        let utterance = pipeline.evaluate("halo", TAG).await;
        assert_eq!(utterance.reply.as_deref(), Some(STATUS_TRANSLATION_ERROR));

        let note = utterance.note.unwrap();
        assert!(note.contains("Translation Error"));
        assert!(note.contains("halo"));

        assert!(pipeline.archive(&note, TAG).await);
        assert_eq!(archive.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_translation_result_maps_to_translation_failed() {
        let archive = MockArchive::new(true);
        let pipeline = pipeline(Some(MockTranslation::Empty), archive);

        let utterance = pipeline.evaluate("halo", TAG).await;
        assert_eq!(utterance.reply.as_deref(), Some(STATUS_TRANSLATION_FAILED));
        assert!(utterance.note.unwrap().contains("Translation Failed"));
    }

    #[tokio::test]
    async fn missing_translator_maps_to_translator_off() {
        let archive = MockArchive::new(true);
        let pipeline = pipeline(None, archive);

        let utterance = pipeline.evaluate("halo", TAG).await;
        assert_eq!(utterance.reply.as_deref(), Some(STATUS_TRANSLATOR_OFF));
        assert!(utterance.note.unwrap().contains("No Translator"));
    }

    #[tokio::test]
    async fn empty_recognition_is_a_complete_no_op() {
        let archive = MockArchive::new(true);
        let pipeline = pipeline(
            Some(MockTranslation::Text("never used".to_string())),
            archive.clone(),
        );

        let utterance = pipeline.evaluate("", TAG).await;
        assert_eq!(utterance, Utterance::empty());
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn archival_failure_is_reported_as_false_only() {
        let archive = MockArchive::new(false);
        let pipeline = pipeline(
            Some(MockTranslation::Text("hello world".to_string())),
            archive.clone(),
        );

        let utterance = pipeline.evaluate("halo dunia", TAG).await;
        // The reply was already decided before archival ran.
        assert_eq!(utterance.reply.as_deref(), Some("hello world"));

        assert!(!pipeline.archive(&utterance.note.unwrap(), TAG).await);
        assert_eq!(archive.calls().len(), 1);
    }
}
