use crate::db::snapshot::DEFAULT_BATCH_SIZE;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub baseline_path: PathBuf,
    pub snapshot_ttl: Duration,
    pub refresh_timeout: Duration,
    pub snapshot_batch_size: usize,
    pub metadata_api_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let baseline_path = env_map
            .get("BASELINE_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnv("BASELINE_PATH".to_string()))?;

        let snapshot_ttl = parse_positive_ms(&env_map, "SNAPSHOT_TTL_MS", 60_000)?;
        let refresh_timeout = parse_positive_ms(&env_map, "REFRESH_TIMEOUT_MS", 30_000)?;

        let snapshot_batch_size = match env_map.get("SNAPSHOT_BATCH_SIZE") {
            None => DEFAULT_BATCH_SIZE,
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_BATCH_SIZE).contains(n))
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "SNAPSHOT_BATCH_SIZE".to_string(),
                        format!("must be between 1 and {}, got {}", MAX_BATCH_SIZE, raw),
                    )
                })?,
        };

        let metadata_api_url = env_map
            .get("METADATA_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            database_path,
            baseline_path,
            snapshot_ttl,
            refresh_timeout,
            snapshot_batch_size,
            metadata_api_url,
        })
    }
}

fn parse_positive_ms(
    env_map: &HashMap<String, String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let ms = match env_map.get(key) {
        None => default_ms,
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u64".to_string())
        })?,
    };
    if ms == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "BASELINE_PATH".to_string(),
            "/tmp/baseline.csv".to_string(),
        );
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.snapshot_ttl, Duration::from_millis(60_000));
        assert_eq!(config.refresh_timeout, Duration::from_millis(30_000));
        assert_eq!(config.snapshot_batch_size, 200);
        assert_eq!(config.metadata_api_url, None);
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_baseline_path() {
        let mut env_map = setup_required_env();
        env_map.remove("BASELINE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "BASELINE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SNAPSHOT_TTL_MS".to_string(), "0".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SNAPSHOT_TTL_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_refresh_timeout() {
        let mut env_map = setup_required_env();
        env_map.insert("REFRESH_TIMEOUT_MS".to_string(), "-5".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "REFRESH_TIMEOUT_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut env_map = setup_required_env();
        env_map.insert("SNAPSHOT_BATCH_SIZE".to_string(), "1000".to_string());
        assert_eq!(
            Config::from_env_map(env_map.clone())
                .unwrap()
                .snapshot_batch_size,
            1000
        );

        env_map.insert("SNAPSHOT_BATCH_SIZE".to_string(), "1001".to_string());
        assert!(matches!(
            Config::from_env_map(env_map.clone()),
            Err(ConfigError::InvalidValue(_, _))
        ));

        env_map.insert("SNAPSHOT_BATCH_SIZE".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_blank_metadata_url_is_none() {
        let mut env_map = setup_required_env();
        env_map.insert("METADATA_API_URL".to_string(), "  ".to_string());
        assert_eq!(Config::from_env_map(env_map).unwrap().metadata_api_url, None);
    }
}
