//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;

use crate::feed::DEFAULT_CAPACITY;

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address.
    pub addr: SocketAddr,
    /// SQLite database URL.
    pub database_url: String,
    /// Buffered events per subscriber before it is dropped.
    pub feed_capacity: usize,
    /// Database connection pool size.
    pub pool_size: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `CHAT_ADDR` | Server bind address | `127.0.0.1:8790` |
    /// | `SQLITE_PATH` | SQLite file path or `sqlite:` URL | `./data/chat.db` |
    /// | `CHAT_FEED_CAPACITY` | Events buffered per subscriber | `256` |
    /// | `CHAT_DB_POOL_SIZE` | Database connection pool size | `20` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let addr = env::var("CHAT_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8790".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddr)?;

        let database_url = database_url(
            &env::var("SQLITE_PATH").unwrap_or_else(|_| "./data/chat.db".to_string()),
        );

        let feed_capacity = match env::var("CHAT_FEED_CAPACITY") {
            Ok(value) => parse_positive(&value)
                .ok_or_else(|| ConfigError::InvalidNumber("CHAT_FEED_CAPACITY", value))?,
            Err(_) => DEFAULT_CAPACITY,
        };

        let pool_size = match env::var("CHAT_DB_POOL_SIZE") {
            Ok(value) => parse_positive(&value)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ConfigError::InvalidNumber("CHAT_DB_POOL_SIZE", value))?,
            Err(_) => 20,
        };

        Ok(Self {
            addr,
            database_url,
            feed_capacity,
            pool_size,
        })
    }

    /// The directory the SQLite file lives in, if the URL names a file.
    pub fn database_dir(&self) -> Option<std::path::PathBuf> {
        let path = self.database_url.strip_prefix("sqlite:")?;
        let path = path.split('?').next()?;
        if path.is_empty() || path.starts_with(":memory:") {
            return None;
        }
        std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
    }
}

/// Accept either a ready `sqlite:` URL or a bare file path.
fn database_url(value: &str) -> String {
    if value.starts_with("sqlite:") {
        value.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", value)
    }
}

fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid CHAT_ADDR format")]
    InvalidAddr,

    #[error("{0} must be a positive integer, got {1:?}")]
    InvalidNumber(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_from_path() {
        assert_eq!(database_url("./data/chat.db"), "sqlite:./data/chat.db?mode=rwc");
        assert_eq!(database_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn test_database_dir() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            database_url: database_url("./data/chat.db"),
            feed_capacity: 1,
            pool_size: 1,
        };
        assert_eq!(config.database_dir(), Some(std::path::PathBuf::from("./data")));

        let memory = ServerConfig {
            database_url: "sqlite::memory:".to_string(),
            ..config
        };
        assert_eq!(memory.database_dir(), None);
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive(" 64 "), Some(64));
        assert_eq!(parse_positive("0"), None);
        assert_eq!(parse_positive("lots"), None);
    }
}
