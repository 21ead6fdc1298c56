// Environment-driven configuration with defaults matching the public J-Grants deployment.
use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "https://api.jgrants-portal.go.jp/exp/v1/public";
pub const DEFAULT_FILES_DIR: &str = "jgrants_files";
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub files_dir: PathBuf,
    pub max_attachment_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            files_dir: PathBuf::from(DEFAULT_FILES_DIR),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let api_base_url = env_string("JGRANTS_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let files_dir = env_string("JGRANTS_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FILES_DIR));
        let max_attachment_bytes = env_string("JGRANTS_MAX_ATTACHMENT_BYTES")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES);
        Self {
            api_base_url,
            files_dir,
            max_attachment_bytes,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_public_deployment() {
        let config = Config::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.max_attachment_bytes, 25 * 1024 * 1024);
        assert_eq!(config.files_dir, PathBuf::from("jgrants_files"));
    }
}
