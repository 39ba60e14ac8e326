//! Runtime settings, resolved from CLI flags and the environment.
//!
//! `.env` is loaded by the binary before flags are parsed, so every
//! `COMPETENCIAS_*` variable can live there as well.

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/competencias";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Http,
    Postgres,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the postgres backend requires DATABASE_URL or --database-url")]
    MissingDatabaseUrl,

    #[error("API URL must start with http:// or https://, got {0:?}")]
    InvalidApiUrl(String),

    #[error("timeout must be at least one second")]
    InvalidTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settings {
    Http(ApiSettings),
    Postgres { database_url: String },
}

impl Settings {
    pub fn resolve(
        backend: BackendKind,
        api_url: &str,
        api_token: Option<String>,
        database_url: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        match backend {
            BackendKind::Http => {
                let base_url = api_url.trim();
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(ConfigError::InvalidApiUrl(base_url.to_string()));
                }
                if timeout_secs == 0 {
                    return Err(ConfigError::InvalidTimeout);
                }
                Ok(Settings::Http(ApiSettings {
                    base_url: base_url.to_string(),
                    token: api_token.filter(|token| !token.trim().is_empty()),
                    timeout_secs,
                }))
            }
            BackendKind::Postgres => database_url
                .filter(|url| !url.trim().is_empty())
                .map(|database_url| Settings::Postgres { database_url })
                .ok_or(ConfigError::MissingDatabaseUrl),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Settings::Http(_) => BackendKind::Http,
            Settings::Postgres { .. } => BackendKind::Postgres,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_settings_drop_blank_token() {
        let settings = Settings::resolve(
            BackendKind::Http,
            " https://evaluaciones.example.edu/competencias ",
            Some("  ".to_string()),
            None,
            DEFAULT_TIMEOUT_SECS,
        )
        .unwrap();

        assert_eq!(
            settings,
            Settings::Http(ApiSettings {
                base_url: "https://evaluaciones.example.edu/competencias".to_string(),
                token: None,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
            })
        );
    }

    #[test]
    fn http_settings_reject_bad_url_and_timeout() {
        assert_eq!(
            Settings::resolve(BackendKind::Http, "localhost:8000", None, None, 10),
            Err(ConfigError::InvalidApiUrl("localhost:8000".to_string()))
        );
        assert_eq!(
            Settings::resolve(BackendKind::Http, DEFAULT_API_URL, None, None, 0),
            Err(ConfigError::InvalidTimeout)
        );
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(
            Settings::resolve(BackendKind::Postgres, DEFAULT_API_URL, None, None, 10),
            Err(ConfigError::MissingDatabaseUrl)
        );
        let settings = Settings::resolve(
            BackendKind::Postgres,
            DEFAULT_API_URL,
            None,
            Some("postgres://localhost/competencias".to_string()),
            10,
        )
        .unwrap();
        assert_eq!(settings.backend(), BackendKind::Postgres);
    }
}
