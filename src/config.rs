use serde::Deserialize;
use std::path::PathBuf;

/// Longest accepted token lifetime. Larger values do not fit a
/// `chrono::Duration`.
pub const MAX_TOKEN_TTL_MINUTES: u64 = (i64::MAX / 60_000) as u64;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Directory holding `state.json` and the `uploads/` folder
    pub data_dir: PathBuf,
    /// Secret used to sign session tokens. Generated at startup when unset.
    pub token_secret: Option<String>,
    /// Session token lifetime in minutes
    pub token_ttl_minutes: u64,
    /// Largest accepted upload body in megabytes
    pub max_upload_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pdfshare"),
            token_secret: None,
            token_ttl_minutes: 24 * 60,
            max_upload_mb: 25,
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var("PDFSHARE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        if let Ok(port) = std::env::var("PDFSHARE_PORT") {
            config.port = parse_env("PDFSHARE_PORT", &port)?;
        }
        if let Ok(data_dir) = std::env::var("PDFSHARE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(secret) = std::env::var("PDFSHARE_TOKEN_SECRET") {
            config.token_secret = Some(secret);
        }
        if let Ok(ttl) = std::env::var("PDFSHARE_TOKEN_TTL_MINUTES") {
            config.token_ttl_minutes = parse_env("PDFSHARE_TOKEN_TTL_MINUTES", &ttl)?;
        }
        if let Ok(max) = std::env::var("PDFSHARE_MAX_UPLOAD_MB") {
            config.max_upload_mb = parse_env("PDFSHARE_MAX_UPLOAD_MB", &max)?;
        }

        if config.token_secret.as_deref().is_some_and(str::is_empty) {
            config.token_secret = None;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.token_ttl_minutes) {
            return Err(ConfigError::InvalidValue(
                "token_ttl_minutes",
                format!(
                    "{} is outside 1..={}",
                    self.token_ttl_minutes, MAX_TOKEN_TTL_MINUTES
                ),
            ));
        }
        if self.max_upload_mb == 0 {
            return Err(ConfigError::InvalidValue(
                "max_upload_mb",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config file path: ~/.config/pdfshare/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pdfshare")
            .join("config.yaml")
    }

    /// Token lifetime as a duration, saturating for values `load` would reject.
    pub fn token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.token_ttl_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Upload limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv(name, value.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    ParseError(PathBuf, serde_yaml::Error),
    #[error("Invalid value for {0}: '{1}'")]
    InvalidEnv(&'static str, String),
    #[error("Invalid {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert!(config.data_dir.to_string_lossy().contains("pdfshare"));
        assert!(config.token_secret.is_none());
        assert_eq!(config.token_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "port: 6001").unwrap();
        writeln!(file, "data_dir: /srv/pdfshare").unwrap();
        writeln!(file, "token_ttl_minutes: 30").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.data_dir, PathBuf::from("/srv/pdfshare"));
        assert_eq!(config.token_ttl_minutes, 30);
        assert_eq!(config.max_upload_mb, 25);
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_token_ttl_out_of_range_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let too_long = MAX_TOKEN_TTL_MINUTES + 1;
        for ttl in ["0".to_string(), too_long.to_string(), u64::MAX.to_string()] {
            std::fs::write(&config_path, format!("token_ttl_minutes: {}\n", ttl)).unwrap();

            let err = Config::load(Some(config_path.clone())).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue("token_ttl_minutes", _)),
                "ttl {} gave {}",
                ttl,
                err
            );
        }

        std::fs::write(
            &config_path,
            format!("token_ttl_minutes: {}\n", MAX_TOKEN_TTL_MINUTES),
        )
        .unwrap();
        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.token_ttl() > chrono::Duration::days(365 * 1000));
    }

    #[test]
    fn test_token_ttl_saturates() {
        let config = Config {
            token_ttl_minutes: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.token_ttl(), chrono::Duration::MAX);
    }

    #[test]
    fn test_zero_upload_limit_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "max_upload_mb: 0\n").unwrap();

        let err = Config::load(Some(config_path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("max_upload_mb", _)));
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        let err = parse_env::<u16>("PDFSHARE_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PDFSHARE_PORT"));
        assert_eq!(parse_env::<u16>("PDFSHARE_PORT", " 8080 ").unwrap(), 8080);
    }
}
