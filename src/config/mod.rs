//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable selecting the runtime mode
pub const ENV_VAR: &str = "ZAPI_ENV";

/// Runtime mode. Production hides internal error messages from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }
}

/// CORS settings for the default CORS middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsConfig {
    pub enabled: bool,
    /// `*` allows any origin
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            max_age: Some(86400),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub environment: Environment,
    pub cors: CorsConfig,
    /// Install the security headers middleware
    pub security_headers: bool,
    /// Name reported by the health endpoint
    pub service_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            cors: CorsConfig::default(),
            security_headers: true,
            service_name: "zapi".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Default configuration with the environment taken from `ZAPI_ENV`
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `ZAPI_ENV` on top of this configuration, if set and valid
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(ENV_VAR) {
            match Environment::parse(&value) {
                Some(env) => self.environment = env,
                None => tracing::warn!(value = %value, "ignoring unknown {}", ENV_VAR),
            }
        }
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert!(config.cors.enabled);
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
        assert!(config.security_headers);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
environment: production
cors:
  allowedOrigins:
    - https://app.example.com
  maxAge: 600
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert!(config.is_production());
        assert_eq!(config.cors.allowed_origins, vec!["https://app.example.com"]);
        assert_eq!(config.cors.max_age, Some(600));
        assert!(config.cors.allowed_methods.contains(&"DELETE".to_string()));
        assert!(config.security_headers);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "environment: test\nsecurityHeaders: false\nserviceName: blog").unwrap();

        let config = AppConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert!(!config.security_headers);
        assert_eq!(config.service_name, "blog");
    }

    #[test]
    fn test_missing_file_error_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");

        let err = AppConfig::from_yaml_file(&path).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(AppConfig::from_yaml_str("environment: [unclosed").is_err());
        assert!(AppConfig::from_yaml_str("environment: staging").is_err());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("PROD"), Some(Environment::Production));
        assert_eq!(Environment::parse("dev"), Some(Environment::Development));
        assert_eq!(Environment::parse("qa"), None);
    }
}
