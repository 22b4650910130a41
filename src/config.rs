use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::item::MediaItem;
use crate::retry::RetryPolicy;
use crate::sort::SortMode;

const DEFAULT_ENV_PREFIX: &str = "DRIVE_GALLERY";
pub const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3/";

static FOLDER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/folders/([a-zA-Z0-9_-]+)").expect("folder id pattern"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveConfig {
    /// Folder id, or a share link containing `/folders/<id>`.
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub shared_drive_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder: String::new(),
            api_key: String::new(),
            shared_drive_id: String::new(),
            page_size: default_page_size(),
            base_url: default_base_url(),
        }
    }
}

fn default_page_size() -> u32 {
    200
}

fn default_base_url() -> String {
    DEFAULT_DRIVE_BASE_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_jitter", with = "humantime_serde")]
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_jitter() -> Duration {
    Duration::from_millis(350)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryConfig {
    #[serde(default)]
    pub fallback_items: Vec<String>,
    #[serde(default)]
    pub default_sort: SortMode,
    #[serde(default = "default_viewport_margin")]
    pub viewport_margin: u16,
    #[serde(default = "default_large_download_bytes")]
    pub large_download_bytes: u64,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            fallback_items: Vec::new(),
            default_sort: SortMode::default(),
            viewport_margin: default_viewport_margin(),
            large_download_bytes: default_large_download_bytes(),
        }
    }
}

fn default_viewport_margin() -> u16 {
    8
}

fn default_large_download_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_download_dir")]
    pub download_dir: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: i64,
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            download_dir: default_download_dir(),
            max_size_bytes: default_max_size_bytes(),
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("drive-gallery"))
}

fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir().or_else(|| dirs::home_dir().map(|dir| dir.join("Downloads")))
}

fn default_max_size_bytes() -> i64 {
    500 * 1024 * 1024
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_video_command")]
    pub video_command: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_command: default_video_command(),
        }
    }
}

fn default_video_command() -> Vec<String> {
    vec!["mpv".into(), "--fs".into(), "%URL%".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// What the synchronization core needs from the outside world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceConfig {
    pub folder: String,
    pub credential: String,
    pub fallback_items: Vec<MediaItem>,
}

impl SourceConfig {
    pub fn is_complete(&self) -> bool {
        !self.folder.trim().is_empty() && !self.credential.trim().is_empty()
    }
}

impl Config {
    pub fn source(&self) -> SourceConfig {
        SourceConfig {
            folder: folder_id(&self.drive.folder),
            credential: self.drive.api_key.trim().to_string(),
            fallback_items: self
                .gallery
                .fallback_items
                .iter()
                .enumerate()
                .map(|(idx, url)| MediaItem::seed(idx, url))
                .collect(),
        }
    }
}

/// Accepts either a bare folder id or a share link.
pub fn folder_id(input: &str) -> String {
    let trimmed = input.trim();
    FOLDER_ID_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.drive.folder.is_empty() {
        base.drive.folder = other.drive.folder;
    }
    if !other.drive.api_key.is_empty() {
        base.drive.api_key = other.drive.api_key;
    }
    if !other.drive.shared_drive_id.is_empty() {
        base.drive.shared_drive_id = other.drive.shared_drive_id;
    }
    if other.drive.page_size != 0 {
        base.drive.page_size = other.drive.page_size;
    }
    if !other.drive.base_url.is_empty() {
        base.drive.base_url = other.drive.base_url;
    }

    if other.retry.max_attempts != 0 {
        base.retry.max_attempts = other.retry.max_attempts;
    }
    base.retry.base_delay = other.retry.base_delay;
    base.retry.max_delay = other.retry.max_delay;
    base.retry.jitter = other.retry.jitter;

    if !other.gallery.fallback_items.is_empty() {
        base.gallery.fallback_items = other.gallery.fallback_items;
    }
    base.gallery.default_sort = other.gallery.default_sort;
    base.gallery.viewport_margin = other.gallery.viewport_margin;
    if other.gallery.large_download_bytes != 0 {
        base.gallery.large_download_bytes = other.gallery.large_download_bytes;
    }

    if other.media.cache_dir.is_some() {
        base.media.cache_dir = other.media.cache_dir;
    }
    if other.media.download_dir.is_some() {
        base.media.download_dir = other.media.download_dir;
    }
    if other.media.max_size_bytes != 0 {
        base.media.max_size_bytes = other.media.max_size_bytes;
    }
    base.media.default_ttl = other.media.default_ttl;
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }

    if !other.player.video_command.is_empty() {
        base.player.video_command = other.player.video_command;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "drive.folder" => cfg.drive.folder = value,
        "drive.api_key" => cfg.drive.api_key = value,
        "drive.shared_drive_id" => cfg.drive.shared_drive_id = value,
        "drive.base_url" => cfg.drive.base_url = value,
        "drive.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.drive.page_size = parsed;
            }
        }
        "retry.max_attempts" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.retry.max_attempts = parsed;
            }
        }
        "retry.base_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.retry.base_delay = duration;
            }
        }
        "retry.max_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.retry.max_delay = duration;
            }
        }
        "retry.jitter" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.retry.jitter = duration;
            }
        }
        "gallery.fallback_items" => {
            cfg.gallery.fallback_items = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "gallery.default_sort" => {
            if let Some(mode) = SortMode::from_key(value.trim()) {
                cfg.gallery.default_sort = mode;
            }
        }
        "gallery.viewport_margin" => {
            if let Ok(parsed) = value.parse::<u16>() {
                cfg.gallery.viewport_margin = parsed;
            }
        }
        "gallery.large_download_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.gallery.large_download_bytes = parsed;
            }
        }
        "media.cache_dir" => cfg.media.cache_dir = Some(PathBuf::from(value)),
        "media.download_dir" => cfg.media.download_dir = Some(PathBuf::from(value)),
        "media.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<i64>() {
                cfg.media.max_size_bytes = parsed;
            }
        }
        "media.default_ttl" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.default_ttl = duration;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "player.video_command" => {
            cfg.player.video_command = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("drive-gallery").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("DRIVE_GALLERY_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.drive.page_size, 200);
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(1200));
        assert_eq!(cfg.gallery.default_sort, SortMode::PhotosFirst);
        assert_eq!(cfg.drive.base_url, DEFAULT_DRIVE_BASE_URL);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "drive:\n  folder: https://drive.google.com/drive/folders/abc_DEF-123?usp=sharing\n  api_key: key\nretry:\n  max_attempts: 2\n  base_delay: 10ms\n  max_delay: 20ms\n  jitter: 0s\ngallery:\n  default_sort: name_asc\n  fallback_items:\n    - https://example.com/a.jpg\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("DRIVE_GALLERY_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.jitter, Duration::ZERO);
        assert_eq!(cfg.gallery.default_sort, SortMode::NameAsc);

        let source = cfg.source();
        assert_eq!(source.folder, "abc_DEF-123");
        assert_eq!(source.credential, "key");
        assert!(source.is_complete());
        assert_eq!(source.fallback_items.len(), 1);
        assert_eq!(source.fallback_items[0].id, "seed-0");
    }

    #[test]
    fn env_overrides() {
        env::set_var("DRIVE_GALLERY_TEST_ENV_DRIVE__API_KEY", "from-env");
        env::set_var("DRIVE_GALLERY_TEST_ENV_GALLERY__DEFAULT_SORT", "sizeDesc");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("DRIVE_GALLERY_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.drive.api_key, "from-env");
        assert_eq!(cfg.gallery.default_sort, SortMode::SizeDesc);
        env::remove_var("DRIVE_GALLERY_TEST_ENV_DRIVE__API_KEY");
        env::remove_var("DRIVE_GALLERY_TEST_ENV_GALLERY__DEFAULT_SORT");
    }

    #[test]
    fn bare_folder_id_passes_through() {
        assert_eq!(folder_id("  1w-m33RdvBsnd  "), "1w-m33RdvBsnd");
        assert_eq!(
            folder_id("https://drive.google.com/drive/folders/XYZ?usp=sharing"),
            "XYZ"
        );
    }
}
