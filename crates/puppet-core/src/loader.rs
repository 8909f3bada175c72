//! Configuration loading
//!
//! Layers, lowest priority first:
//!
//! 1. `config/default.toml` compiled into the binary
//! 2. `config/default`, `config/{PUPPET_ENV}` and `config/local` next to the
//!    working directory, each optional
//! 3. An explicit file passed by the caller
//! 4. `PUPPET_*` environment variables, `__` between nested keys
//!    (`PUPPET_DIALOGUE__SILENCE_TIMEOUT_SECS=1.5`)

use crate::config::EngineConfig;
use crate::error::Result;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;
use tracing::{debug, info};

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PUPPET";

/// Load, deserialize and validate the engine configuration
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let profile = std::env::var("PUPPET_ENV").unwrap_or_else(|_| "development".to_string());
    debug!(profile = %profile, "Loading configuration");

    let mut builder = base_builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", profile)).required(false))
        .add_source(File::with_name("config/local").required(false));

    if let Some(path) = explicit {
        info!(path = %path.display(), "Using configuration file");
        builder = builder.add_source(File::from(path).required(true));
    }

    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    finish(builder)
}

/// Load the embedded defaults overlaid with a TOML document
pub fn load_config_from_str(overrides: &str) -> Result<EngineConfig> {
    finish(base_builder().add_source(File::from_str(overrides, FileFormat::Toml)))
}

fn base_builder() -> ConfigBuilder<config::builder::DefaultState> {
    Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
}

fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<EngineConfig> {
    let config: EngineConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use puppet_dialogue::config::{LlmKind, RecognizerKind};

    #[test]
    fn test_embedded_defaults_load() {
        let config = tokio_test::assert_ok!(load_config_from_str(""));
        assert_eq!(config.render.fps, 60);
        assert_eq!(config.capture.poll_interval_ms, 10);
        assert_eq!(config.dialogue.max_history_turns, 10);
        assert_eq!(config.adapters.llm.provider, LlmKind::Scripted);
        assert_eq!(config.adapters.asr.provider, RecognizerKind::Scripted);
        assert!(config.animation.emotions.contains_key("happy"));
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let config = load_config_from_str(
            r#"
            [render]
            fps = 30

            [dialogue]
            silence_timeout_secs = 1.5
            max_history_turns = 4
            context_turns = 2

            [adapters.llm]
            provider = "anthropic"
            model = "claude-3-5-haiku-latest"
            "#,
        )
        .unwrap();
        assert_eq!(config.render.fps, 30);
        assert_eq!(config.dialogue.max_history_turns, 4);
        assert!((config.dialogue.silence_timeout_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.adapters.llm.provider, LlmKind::Anthropic);
        assert_eq!(config.adapters.llm.max_tokens, 512);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let err = load_config_from_str("[render]\nfps = 0\n").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { ref field, .. } if field == "render.fps"));
    }

    #[test]
    fn test_malformed_document_is_load_error() {
        let err = load_config_from_str("[render\nfps = ").unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }

    #[test]
    fn test_wrong_type_is_load_error() {
        let err = load_config_from_str("[render]\nfps = \"fast\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }
}
