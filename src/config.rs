use directories::ProjectDirs;
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "CHAT_BOX_DATA_DIR";
pub const LOG_ENV: &str = "CHAT_BOX_LOG";
pub const DEFAULT_LOG_FILTER: &str = "chat_box_lib=info";

/// Process-level configuration. User preferences live in the settings store.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    /// Environment overrides first, then the platform data directory,
    /// then `./.chat-box` when the platform gives no home directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                ProjectDirs::from("com", "bixiaohu", "chat-box")
                    .map(|dirs| dirs.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from(".chat-box"));
        let log_filter =
            std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        Self {
            data_dir,
            log_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_filter() {
        let config = AppConfig::new("/tmp/box");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/box"));
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_from_env_always_yields_a_directory() {
        let config = AppConfig::from_env();
        assert!(!config.data_dir.as_os_str().is_empty());
    }
}
