//! Database credentials supplied to `ConnectionPool::initialize`.

use crate::error::{ConfigError, ConfigResult};

/// Credentials for the backing database service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Service endpoint or connection URL.
    pub url: String,
    /// Secret used to authenticate against the service.
    pub api_key: String,
}

impl Credentials {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    /// Read `DATABASE_URL` and `DATABASE_API_KEY` from the process environment.
    ///
    /// Unset variables become empty strings; call [`Credentials::validate`]
    /// to reject them.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            url: lookup("DATABASE_URL").unwrap_or_default(),
            api_key: lookup("DATABASE_API_KEY").unwrap_or_default(),
        }
    }

    /// Fail fast when a required field is blank.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingCredential("url"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("api_key"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_complete_credentials() {
        let creds = Credentials::new("postgres://db.internal/app", "secret");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_url() {
        let creds = Credentials::new("  ", "secret");
        assert_eq!(creds.validate(), Err(ConfigError::MissingCredential("url")));
    }

    #[test]
    fn validate_rejects_missing_key() {
        let creds = Credentials::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://db.internal/app".to_string()),
            _ => None,
        });
        assert_eq!(creds.validate(), Err(ConfigError::MissingCredential("api_key")));
    }

    #[test]
    fn debug_redacts_api_key() {
        let creds = Credentials::new("postgres://db.internal/app", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("db.internal"));
        assert!(!rendered.contains("hunter2"));
    }
}
