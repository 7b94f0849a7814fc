use std::path::{Path, PathBuf};

pub const DEFAULT_STATIC_DIR: &str = "static";
pub const INDEX_FILE: &str = "index.html";

/// HTTP surface settings of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub static_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl RelayConfig {
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.static_dir.join(INDEX_FILE)
    }

    /// Whether the static directory should be mounted under `/static`.
    pub fn serves_static(&self) -> bool {
        self.index_path().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_static_dir() {
        let config = RelayConfig::default();
        assert_eq!(config.static_dir(), Path::new("static"));
        assert_eq!(config.index_path(), Path::new("static").join("index.html"));
    }

    #[test]
    fn missing_directory_is_not_served() {
        let config = RelayConfig::default().with_static_dir("/definitely/not/here");
        assert!(!config.serves_static());
    }
}
