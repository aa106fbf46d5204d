//! Classification service configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum size of a single uploaded file, in bytes
    pub max_file_size: usize,
    /// Lowercase extensions including the leading dot
    pub allowed_extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            debug: false,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/cats_dogs_model.pth"),
            num_classes: 2,
            class_names: vec!["cats".to_string(), "dogs".to_string()],
            device: "cpu".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: [".jpg", ".jpeg", ".png", ".bmp", ".tiff"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Apply `MODEL_PATH`, `HOST`, `PORT` and `DEBUG` from the process environment.
    pub fn with_env_overrides(self) -> anyhow::Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {:?}: {}", port, e))?;
        }
        if let Some(debug) = lookup("DEBUG") {
            self.server.debug = debug.eq_ignore_ascii_case("true");
        }
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.num_classes == 0 {
            anyhow::bail!("model.num_classes must be at least 1");
        }
        if self.model.class_names.len() != self.model.num_classes {
            anyhow::bail!(
                "model.class_names has {} entries but model.num_classes is {}",
                self.model.class_names.len(),
                self.model.num_classes
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_service_contract() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.model.num_classes, 2);
        assert_eq!(config.model.class_names, vec!["cats", "dogs"]);
        assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
        assert!(config.upload.allowed_extensions.contains(&".tiff".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [model]
            path = "weights/resnet18.safetensors"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.model.path, PathBuf::from("weights/resnet18.safetensors"));
        assert_eq!(config.model.num_classes, 2);
    }

    #[test]
    fn test_mismatched_class_names_rejected() {
        let result = Config::from_toml(
            r#"
            [model]
            num_classes = 3
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MODEL_PATH", "/srv/model.pth"),
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("DEBUG", "TRUE"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.model.path, PathBuf::from("/srv/model.pth"));
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.server.debug);
    }

    #[test]
    fn test_bad_port_override_is_error() {
        let result = Config::default().apply_overrides(|k| {
            (k == "PORT").then(|| "eighty".to_string())
        });
        assert!(result.is_err());
    }
}
