use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::database::{Preallocator, DEFAULT_FILL_BYTES, DEFAULT_FREE_PAGE_THRESHOLD};

/// Default database file name inside the data directory
pub const DEFAULT_DB_FILE_NAME: &str = "dlstore.sqlite3";

pub struct StoreConfig {
    /// Directory holding the database file
    pub data_dir: String,

    /// Database file name inside `data_dir`
    pub db_file_name: String,

    /// Grow the file when the free list has at most this many pages
    pub prealloc_threshold_pages: u64,

    /// Bytes written to grow the file (default: 100 MiB)
    pub prealloc_fill_bytes: u64,
}

const EMPTY_CONFIG: &str = r#"### dlstore configuration file

### directory holding the database file
# data_dir = "~/.dlstore"

### database file name inside data_dir
# db_file_name = "dlstore.sqlite3"

### disk pre-allocation
# prealloc_threshold_pages = 1024      # grow when free pages <= this
# prealloc_fill_bytes = 104857600      # 100 MiB
"#;

impl Default for StoreConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.dlstore", home_dir),
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
            prealloc_threshold_pages: DEFAULT_FREE_PAGE_THRESHOLD,
            prealloc_fill_bytes: DEFAULT_FILL_BYTES,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file and `DLSTORE_*` environment variables
    ///
    /// Without an explicit path, `$HOME/.dlstore/dlstore.toml` is used. A
    /// missing file is created with every option commented out.
    pub fn new(path: &Option<String>) -> Result<StoreConfig> {
        let mut builder = Config::builder();

        let config_path = match path {
            Some(p) => p.clone(),
            None => {
                let home_dir =
                    dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
                let dlstore_dir = home_dir.join(".dlstore");
                std::fs::create_dir_all(&dlstore_dir)
                    .map_err(|e| anyhow!("Unable to create dlstore directory: {}", e))?;
                dlstore_dir.join("dlstore.toml").to_string_lossy().to_string()
            }
        };

        if Path::new(config_path.as_str()).exists() {
            builder = builder.add_source(config::File::with_name(config_path.as_str()));
        } else {
            std::fs::write(config_path.as_str(), EMPTY_CONFIG)
                .map_err(|e| anyhow!("Unable to create config file {}: {}", config_path, e))?;
        }

        // E.g., `DLSTORE_DATA_DIR=/tmp/dl dlstore init` overrides the data directory
        builder = builder.add_source(config::Environment::with_prefix("DLSTORE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let defaults = StoreConfig::default();

        let data_dir = config
            .get("data_dir")
            .map(|d| expand_home(d))
            .unwrap_or(defaults.data_dir);

        let db_file_name = config
            .get("db_file_name")
            .cloned()
            .unwrap_or(defaults.db_file_name);

        let prealloc_threshold_pages = parse_u64(&config, "prealloc_threshold_pages")?
            .unwrap_or(defaults.prealloc_threshold_pages);

        let prealloc_fill_bytes =
            parse_u64(&config, "prealloc_fill_bytes")?.unwrap_or(defaults.prealloc_fill_bytes);

        Ok(StoreConfig {
            data_dir,
            db_file_name,
            prealloc_threshold_pages,
            prealloc_fill_bytes,
        })
    }

    /// Configuration for an explicit database file, with default pre-allocation
    pub fn at_path(path: impl AsRef<Path>) -> StoreConfig {
        let path = path.as_ref();
        let data_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                parent.to_string_lossy().to_string()
            }
            _ => ".".to_string(),
        };
        let db_file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_DB_FILE_NAME.to_string());

        StoreConfig {
            data_dir,
            db_file_name,
            ..StoreConfig::default()
        }
    }

    /// Override the pre-allocation settings
    pub fn with_preallocation(mut self, threshold_pages: u64, fill_bytes: u64) -> StoreConfig {
        self.prealloc_threshold_pages = threshold_pages;
        self.prealloc_fill_bytes = fill_bytes;
        self
    }

    /// Get the path to the SQLite database file
    pub fn db_path(&self) -> PathBuf {
        Path::new(self.data_dir.as_str()).join(self.db_file_name.as_str())
    }

    pub fn preallocator(&self) -> Preallocator {
        Preallocator::new(self.prealloc_threshold_pages, self.prealloc_fill_bytes)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.db_path().display()),
            format!("Prealloc Threshold: {} pages", self.prealloc_threshold_pages),
            format!(
                "Prealloc Fill:      {}",
                crate::format_size(self.prealloc_fill_bytes)
            ),
        ]
        .join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.dlstore/dlstore.toml", home_dir)
    }
}

fn parse_u64(config: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    config
        .get(key)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", key, v, e))
        })
        .transpose()
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.prealloc_threshold_pages, 1024);
        assert_eq!(config.prealloc_fill_bytes, 100 * 1024 * 1024);
        assert_eq!(config.db_file_name, "dlstore.sqlite3");
    }

    #[test]
    fn test_at_path() {
        let config = StoreConfig::at_path("/test/dir/store.db");
        assert_eq!(config.data_dir, "/test/dir");
        assert_eq!(config.db_path(), PathBuf::from("/test/dir/store.db"));

        let config = StoreConfig::at_path("store.db");
        assert_eq!(config.db_path(), PathBuf::from("./store.db"));
    }

    #[test]
    fn test_preallocator_from_config() {
        let config = StoreConfig::at_path("/tmp/x.db").with_preallocation(10, 4096);
        let prealloc = config.preallocator();
        assert_eq!(prealloc.threshold_pages, 10);
        assert_eq!(prealloc.fill_bytes, 4096);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlstore.toml");
        std::fs::write(
            &path,
            "data_dir = \"/srv/dl\"\nprealloc_threshold_pages = 64\nprealloc_fill_bytes = 1048576\n",
        )
        .unwrap();

        let config = StoreConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.data_dir, "/srv/dl");
        assert_eq!(config.db_file_name, DEFAULT_DB_FILE_NAME);
        assert_eq!(config.prealloc_threshold_pages, 64);
        assert_eq!(config.prealloc_fill_bytes, 1048576);
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.toml");

        let config = StoreConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert!(path.exists());
        assert_eq!(config.prealloc_threshold_pages, DEFAULT_FREE_PAGE_THRESHOLD);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "prealloc_fill_bytes = \"lots\"\n").unwrap();

        assert!(StoreConfig::new(&Some(path.to_string_lossy().to_string())).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(104857600), "100.00 MB");
    }
}
