//! Common error types

use thiserror::Error;

/// Errors shared by configuration loading and the persistence capabilities.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Key-value persistence failed (unreadable file, corrupt payload, ...).
    /// Callers are expected to degrade to defaults rather than propagate this.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_port(raw: &str) -> Result<u16> {
        #[derive(serde::Deserialize)]
        struct Doc {
            port: u16,
        }
        let doc: Doc = toml::from_str(raw)?;
        Ok(doc.port)
    }

    #[test]
    fn toml_failures_convert_with_question_mark() {
        assert_eq!(parse_port("port = 8080").unwrap(), 8080);
        let err = parse_port("port = \"eighty\"").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
        assert!(err.to_string().starts_with("TOML parse error:"), "got: {err}");
    }

    #[test]
    fn storage_and_config_messages() {
        assert_eq!(
            Error::Storage("corrupt payload".into()).to_string(),
            "Storage error: corrupt payload"
        );
        assert_eq!(
            Error::Config("base_url is empty".into()).to_string(),
            "Configuration error: base_url is empty"
        );
    }
}
