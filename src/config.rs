//! # Configuration Management
//!
//! Loads and validates the relay configuration from multiple sources:
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables with an `APP_` prefix (e.g. `APP_SPEECH_KEY`)
//! - Built-in defaults
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`APP_SERVER_HOST`, `APP_SPEECH_KEY`, ...)
//! 2. Configuration file (`config.toml`)
//! 3. Default values (the `Default` impl below)
//!
//! Credentials (speech and translator subscription keys) are expected to
//! arrive via environment variables or a `.env` file; the defaults leave
//! them empty and validation insists on the speech key being present. An
//! empty translator key is legal and switches the result pipeline into its
//! "Translator Off" path.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
///
/// Broken into logical groups so each collaborator client receives only the
/// section it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub translation: TranslationConfig,
    pub notes: NotesConfig,
}

/// Listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: accept device connections from any interface
///   (the normal deployment; devices are on the local network or a tunnel)
/// - `port = 8766`: the port the device firmware is flashed with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-recognition engine settings (Azure Speech Service).
///
/// `language` is the source spoken language of the audio, a BCP-47 code
/// such as `id-ID`. It is fixed per deployment: the devices do not
/// negotiate it. The audio format itself (mono, 16-bit, 16 kHz) is a
/// firmware contract and lives as constants in `crate::speech`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub key: String,
    pub region: String,
    pub language: String,
}

/// Translation engine settings (Azure Translator REST v3).
///
/// `source`/`target` are two-letter language codes; they also feed the
/// archival record prefixes (e.g. `(ID): ... (EN): ...`). An empty `key`
/// disables translation entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub key: String,
    pub endpoint: String,
    pub region: String,
    pub source: String,
    pub target: String,
}

/// Note-archival endpoint settings.
///
/// `timeout` is seconds for the whole POST; the archival call must never
/// hold an utterance longer than this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesConfig {
    pub url: String,
    pub timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8766,
            },
            speech: SpeechConfig {
                key: String::new(),
                region: "southeastasia".to_string(),
                language: "id-ID".to_string(),
            },
            translation: TranslationConfig {
                key: String::new(),
                endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
                region: "southeastasia".to_string(),
                source: "id".to_string(),
                target: "en".to_string(),
            },
            notes: NotesConfig {
                url: "https://suara-nusa.vercel.app/api/notes".to_string(),
                timeout: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// `HOST` and `PORT` (without the `APP_` prefix) are honored as a
    /// special case because deployment platforms commonly inject them.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration can actually run a relay.
    ///
    /// The speech key is required: without it every connection would fail
    /// at engine start. The translator key is optional by design.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.speech.key.is_empty() {
            return Err(anyhow::anyhow!(
                "Speech subscription key is not set (APP_SPEECH_KEY)"
            ));
        }

        if self.speech.region.is_empty() {
            return Err(anyhow::anyhow!("Speech region cannot be empty"));
        }

        if self.speech.language.is_empty() {
            return Err(anyhow::anyhow!("Speech recognition language cannot be empty"));
        }

        if self.translation.source.is_empty() || self.translation.target.is_empty() {
            return Err(anyhow::anyhow!(
                "Translation source/target languages cannot be empty"
            ));
        }

        if self.notes.url.is_empty() {
            return Err(anyhow::anyhow!("Notes endpoint URL cannot be empty"));
        }

        if self.notes.timeout == 0 {
            return Err(anyhow::anyhow!("Notes timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Whether the translation collaborator is configured at all.
    pub fn translator_configured(&self) -> bool {
        !self.translation.key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Default configuration is valid once a speech key is supplied.
    #[test]
    fn test_default_config() {
        let mut config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8766);
        assert_eq!(config.speech.language, "id-ID");

        // Missing credentials must be caught...
        assert!(config.validate().is_err());

        // ...and a key is all that is needed to pass.
        config.speech.key = "test-key".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.speech.key = "test-key".to_string();

        config.server.port = 0;
        assert!(config.validate().is_err());

        config.server.port = 8766;
        config.notes.timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_translator_toggle() {
        let mut config = AppConfig::default();
        assert!(!config.translator_configured());

        config.translation.key = "translator-key".to_string();
        assert!(config.translator_configured());
    }
}
