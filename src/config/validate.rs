// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CmdstreamError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CmdstreamError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_process(cfg)?;
    validate_remote(cfg)?;
    validate_history(cfg)?;
    Ok(())
}

fn validate_process(cfg: &RawConfigFile) -> Result<()> {
    let delimiter = &cfg.process.delimiter;
    if delimiter.is_empty() {
        return Err(CmdstreamError::ConfigError(
            "[process].delimiter must not be empty".to_string(),
        ));
    }
    // The delimiter has to be something a JSON envelope can never contain
    // outside a string, and nothing that opens or closes one.
    if let Some(bad) = delimiter.chars().find(|c| matches!(c, '{' | '}' | '"')) {
        return Err(CmdstreamError::ConfigError(format!(
            "[process].delimiter '{}' must not contain '{}'",
            delimiter, bad
        )));
    }
    Ok(())
}

fn validate_remote(cfg: &RawConfigFile) -> Result<()> {
    if cfg.remote.marker.is_empty() {
        return Err(CmdstreamError::ConfigError(
            "[remote].marker must not be empty".to_string(),
        ));
    }
    if cfg.remote.max_port_attempts == 0 {
        return Err(CmdstreamError::ConfigError(
            "[remote].max_port_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_history(cfg: &RawConfigFile) -> Result<()> {
    let caps = [
        ("command_cap", cfg.history.command_cap),
        ("log_cap", cfg.history.log_cap),
        ("server_event_cap", cfg.history.server_event_cap),
    ];
    for (name, value) in caps {
        if value == 0 {
            return Err(CmdstreamError::ConfigError(format!(
                "[history].{} must be >= 1 (got 0)",
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.process.delimiter, "<|report|>");
        assert_eq!(cfg.process.exit_grace_ms, 100);
        assert!(cfg.process.accept_unterminated);
        assert_eq!(cfg.remote.start_port, 8432);
        assert_eq!(cfg.remote.marker, "data: ");
        assert_eq!(cfg.history.command_cap, 30);
    }

    #[test]
    fn delimiter_rules() {
        let err = parse("[process]\ndelimiter = \"\"").unwrap_err();
        assert!(matches!(err, CmdstreamError::ConfigError(_)));

        let err = parse("[process]\ndelimiter = \"}}\"").unwrap_err();
        assert!(err.to_string().contains("must not contain"));

        assert!(parse("[process]\ndelimiter = \"@@END@@\"").is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(parse("[remote]\nmax_port_attempts = 0").is_err());
        assert!(parse("[remote]\nmarker = \"\"").is_err());
        let err = parse("[history]\nlog_cap = 0").unwrap_err();
        assert!(err.to_string().contains("log_cap"));
    }

    #[test]
    fn unknown_channel_is_a_toml_error() {
        let err = parse("[config]\nchannel = \"pigeon\"").unwrap_err();
        assert!(matches!(err, CmdstreamError::TomlError(_)));
    }
}
