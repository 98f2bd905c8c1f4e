use crate::window::event::StreamKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// One ingestion lane and the window policy applied to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default)]
    pub partition: i32,
    /// Free-text description carried into every window summary
    #[serde(default)]
    pub context: String,
    pub window_duration_seconds: u64,
    /// 0 disables count-based closing
    #[serde(default)]
    pub window_max_events: usize,
    pub source: SourceConfig,
}

impl StreamConfig {
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.name, self.partition)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub path: PathBuf,
    /// JSON field whose value becomes the event key
    #[serde(default)]
    pub key_field: Option<String>,
    /// JSON field holding an RFC 3339 event timestamp
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default)]
    pub read: ReadConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    #[serde(default = "default_read_start")]
    pub start: ReadStart,
    #[serde(default)]
    pub follow: bool,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            start: default_read_start(),
            follow: false,
        }
    }
}

fn default_read_start() -> ReadStart {
    ReadStart::Beginning
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    Beginning,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause after a failed pull before trying again
    #[serde(with = "duration_format")]
    pub retry_backoff: Duration,
    /// How long shutdown waits for outstanding window hand-offs
    #[serde(with = "duration_format")]
    pub shutdown_grace: Duration,
    pub keep_raw_events: bool,
    pub skip_empty_windows: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            keep_raw_events: false,
            skip_empty_windows: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub embedding_model: String,
    pub llm_model: String,
    #[serde(with = "duration_format")]
    pub embed_timeout: Duration,
    #[serde(with = "duration_format")]
    pub generate_timeout: Duration,
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            llm_model: "llama3".to_string(),
            embed_timeout: Duration::from_secs(30),
            generate_timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Duckdb,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Duckdb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub listen: String,
    /// Windows retrieved per query when the request does not say
    pub top_k: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            top_k: 5,
        }
    }
}

/// Durations written as `500ms`, `5s`, `2m` or `1h`
pub(crate) mod duration_format {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }

        let (value_str, unit) = if let Some(v) = s.strip_suffix("ms") {
            (v, "ms")
        } else if let Some(v) = s.strip_suffix('s') {
            (v, "s")
        } else if let Some(v) = s.strip_suffix('m') {
            (v, "m")
        } else if let Some(v) = s.strip_suffix('h') {
            (v, "h")
        } else {
            return Err(format!("invalid duration format: {}", s));
        };

        let value: u64 = value_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid numeric value: {}", value_str))?;

        Ok(match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            _ => Duration::from_secs(value * 3600),
        })
    }

    pub fn format_duration(d: Duration) -> String {
        let secs = d.as_secs();
        if d.subsec_millis() != 0 || secs == 0 {
            format!("{}ms", d.as_millis())
        } else if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}
