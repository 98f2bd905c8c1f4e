use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    for stream in &mut config.streams {
        stream.source.path = expand_tilde(&stream.source.path);
    }

    if let Some(path) = &config.storage.path {
        config.storage.path = Some(expand_tilde(path));
    }
}

/// Collect every problem in the config rather than stopping at the first
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.streams.is_empty() {
        errors.push("config must define at least one stream under 'streams'".to_string());
    }

    let mut seen = HashSet::new();
    for (i, stream) in config.streams.iter().enumerate() {
        validate_stream(i, stream, &mut errors);

        if !stream.name.is_empty() && !seen.insert((stream.name.as_str(), stream.partition)) {
            errors.push(format!(
                "streams[{}]: duplicate stream '{}' partition {}",
                i, stream.name, stream.partition
            ));
        }
    }

    validate_ollama(&config.ollama, &mut errors);

    if config.storage.storage_type == StorageType::Duckdb && config.storage.path.is_none() {
        errors.push("storage: 'path' is required when type is duckdb".to_string());
    }

    if config.web.top_k == 0 {
        errors.push("web.top_k must be greater than 0".to_string());
    }

    if config.web.listen.trim().is_empty() {
        errors.push("web.listen cannot be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_stream(index: usize, stream: &StreamConfig, errors: &mut Vec<String>) {
    let prefix = if stream.name.is_empty() {
        format!("streams[{}]", index)
    } else {
        format!("stream '{}'", stream.name)
    };

    if stream.name.trim().is_empty() {
        errors.push(format!("{}: name cannot be empty", prefix));
    }

    if stream.partition < 0 {
        errors.push(format!("{}: partition cannot be negative", prefix));
    }

    if stream.window_duration_seconds == 0 {
        errors.push(format!(
            "{}: window_duration_seconds must be greater than 0",
            prefix
        ));
    }

    if stream.source.path.as_os_str().is_empty() {
        errors.push(format!("{}: source path cannot be empty", prefix));
    }

    for (field, value) in [
        ("key_field", &stream.source.key_field),
        ("timestamp_field", &stream.source.timestamp_field),
    ] {
        if matches!(value, Some(v) if v.trim().is_empty()) {
            errors.push(format!("{}: source {} cannot be empty", prefix, field));
        }
    }
}

fn validate_ollama(ollama: &OllamaConfig, errors: &mut Vec<String>) {
    if ollama.url.trim().is_empty() {
        errors.push("ollama.url cannot be empty".to_string());
    } else if !ollama.url.starts_with("http://") && !ollama.url.starts_with("https://") {
        errors.push(format!(
            "ollama.url must start with http:// or https://, got '{}'",
            ollama.url
        ));
    }

    if ollama.embedding_model.trim().is_empty() {
        errors.push("ollama.embedding_model cannot be empty".to_string());
    }

    if ollama.llm_model.trim().is_empty() {
        errors.push("ollama.llm_model cannot be empty".to_string());
    }
}
