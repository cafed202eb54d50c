use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ai: AIConfig,
    pub query: QueryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding the loaded patient records
    pub path: PathBuf,
    /// Directory the loader reads `*.csv` files from
    pub csv_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./synthea_data.db"),
            csv_dir: PathBuf::from("./csvs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AIConfig {
    pub model: String,
    /// Base url of an OpenAI compatible API, without the `/chat/completions` suffix
    pub url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Upper bound on model -> tool -> model round trips for a single prompt
    pub max_tool_rounds: usize,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tool_rounds: 16,
        }
    }
}

impl AIConfig {
    /// Local servers (ollama, vllm, llama.cpp) accept unauthenticated requests.
    pub fn requires_api_key(&self) -> bool {
        !["localhost", "127.0.0.1", "0.0.0.0"]
            .iter()
            .any(|host| self.url.contains(host))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum number of rows a free-form `query_db` statement returns
    pub row_cap: usize,
    /// Keywords that make `query_db` reject a statement outright
    pub denied_keywords: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            row_cap: 1000,
            denied_keywords: [
                "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "ATTACH",
                "DETACH", "PRAGMA", "VACUUM", "REINDEX", "GRANT", "REVOKE", "MERGE", "UPSERT",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Diagnostics written to stderr. `RUST_LOG` and `MEDCHAT_LOG_FORMAT` win over
/// these when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directives, e.g. `info` or `warn,db=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl AppConfig {
    pub fn get_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return AppConfig::default();
        };

        Self::load(&path).unwrap_or_default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// `$HOME/.config/medchat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let home_dir = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home_dir)
                .join(".config")
                .join("medchat")
                .join("config.toml"),
        )
    }
}
