//! API key lookup for the generation service.
//!
//! `GenerationConfig` names up to three places for the key. The first one
//! that is set is used, even if reading it fails: `api_key` (inline, for
//! local runs), `api_key_file` (mounted secrets), `api_key_env_var`.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::config::GenerationConfig;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Failed to read API key file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("API key from {source_kind} is blank")]
    Blank { source_kind: &'static str },
}

enum KeySource<'a> {
    Inline(&'a str),
    File(&'a str),
    EnvVar(&'a str),
}

impl KeySource<'_> {
    fn kind(&self) -> &'static str {
        match self {
            KeySource::Inline(_) => "api_key",
            KeySource::File(_) => "api_key_file",
            KeySource::EnvVar(_) => "api_key_env_var",
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn configured_source(config: &GenerationConfig) -> Option<KeySource<'_>> {
    non_blank(&config.api_key)
        .map(KeySource::Inline)
        .or_else(|| non_blank(&config.api_key_file).map(KeySource::File))
        .or_else(|| non_blank(&config.api_key_env_var).map(KeySource::EnvVar))
}

/// Whether any key source is configured.
pub fn has_api_key_source(config: &GenerationConfig) -> bool {
    configured_source(config).is_some()
}

/// Reads the API key once, at startup. `Ok(None)` means no source is
/// configured and requests go out unauthenticated.
pub fn resolve_api_key(config: &GenerationConfig) -> Result<Option<SecretString>, SecretError> {
    let Some(source) = configured_source(config) else {
        return Ok(None);
    };

    let raw = match &source {
        KeySource::Inline(value) => value.to_string(),
        KeySource::File(path) => {
            let path = expand_home(path);
            fs::read_to_string(&path).map_err(|source| SecretError::FileRead { path, source })?
        }
        KeySource::EnvVar(name) => std::env::var(name).map_err(|e| match e {
            std::env::VarError::NotPresent => SecretError::EnvVarNotSet {
                name: name.to_string(),
            },
            std::env::VarError::NotUnicode(_) => SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            },
        })?,
    };

    // Files and env vars often carry a trailing newline.
    let key = raw.trim();
    if key.is_empty() {
        return Err(SecretError::Blank {
            source_kind: source.kind(),
        });
    }
    Ok(Some(SecretString::from(key.to_string())))
}

/// Expands a leading `~` or `~/` to the current user's home directory.
/// `~user` forms are left untouched.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}
