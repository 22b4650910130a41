use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::catalog::MediaCatalog;
use crate::config::{self, Config};
use crate::drive;
use crate::fetcher::RemoteListingFetcher;
use crate::item::MediaItem;
use crate::logging;
use crate::media;
use crate::reactions::ReactionStore;
use crate::sort::SortMode;
use crate::storage;
use crate::ui;
use crate::ui::format_bytes;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
}

fn load_config(options: &RunOptions) -> Result<Config> {
    config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")
}

fn open_store(cfg: &Config) -> Result<Arc<storage::Store>> {
    let store = storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    })
    .context("open storage")?;
    Ok(Arc::new(store))
}

fn build_fetcher(cfg: &Config) -> Option<Arc<RemoteListingFetcher>> {
    let client = drive::Client::new(drive::ClientConfig {
        user_agent: format!("drive-gallery/{}", crate::VERSION),
        base_url: Some(cfg.drive.base_url.clone()),
    });
    match client {
        Ok(client) => {
            let base_url = client.base_url().clone();
            let fetcher = RemoteListingFetcher::new(Arc::new(client), base_url, cfg.retry.policy())
                .with_page_size(cfg.drive.page_size)
                .with_shared_drive(Some(cfg.drive.shared_drive_id.clone()));
            Some(Arc::new(fetcher))
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "drive client unavailable");
            None
        }
    }
}

fn build_catalog(cfg: &Config, store: &Arc<storage::Store>) -> MediaCatalog {
    let reactions = Arc::new(ReactionStore::new(store.as_ref().clone()));
    MediaCatalog::new(build_fetcher(cfg), reactions)
}

pub fn run(options: RunOptions) -> Result<()> {
    logging::init(logging::Target::FileFromEnv)?;
    let cfg = load_config(&options)?;
    let display_path = friendly_path(options.config_file.clone().or_else(config::default_path));
    let store = open_store(&cfg)?;

    let media_cfg = media::Config {
        cache_dir: cfg.media.cache_dir.clone(),
        download_dir: cfg.media.download_dir.clone(),
        max_size_bytes: cfg.media.max_size_bytes,
        default_ttl: cfg.media.default_ttl,
        workers: cfg.media.workers,
        large_download_bytes: cfg.gallery.large_download_bytes,
    };
    let media_manager = match media::Manager::new(
        store.clone(),
        media_cfg,
        Arc::new(media::SystemBrowser),
    ) {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "media workers unavailable");
            None
        }
    };

    let options = ui::Options {
        catalog: build_catalog(&cfg, &store),
        source: cfg.source(),
        default_sort: cfg.gallery.default_sort,
        viewport_margin: cfg.gallery.viewport_margin as usize,
        media_handle: media_manager.as_ref().map(|manager| manager.handle()),
        player_command: cfg.player.video_command.clone(),
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    let result = model.run();
    drop(model);
    drop(media_manager);
    result
}

/// Headless sync: prints the status line, totals and the sorted listing.
pub fn list(options: RunOptions, sort: Option<SortMode>, out: &mut dyn Write) -> Result<()> {
    logging::init(logging::Target::Stderr)?;
    let cfg = load_config(&options)?;
    let store = open_store(&cfg)?;
    let source = cfg.source();
    let mut catalog = build_catalog(&cfg, &store);

    catalog.set_unlocked(true, &source);
    while catalog.is_loading() {
        catalog.wait(Duration::from_millis(250));
    }

    let report = catalog.report();
    writeln!(out, "status: {} ({})", report.status.as_str(), report.summary())?;
    if let Some(url) = &report.last_url {
        writeln!(out, "last request: {url}")?;
    }
    let totals = catalog.totals();
    writeln!(out, "likes: {} dislikes: {}", totals.likes, totals.dislikes)?;

    let mode = sort.unwrap_or(cfg.gallery.default_sort);
    writeln!(out, "sort: {}", mode.as_str())?;
    for item in catalog.sorted(mode) {
        writeln!(out, "{}", listing_row(&item))?;
    }
    out.flush()?;
    Ok(())
}

fn listing_row(item: &MediaItem) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        item.kind.label(),
        format_bytes(item.size_bytes),
        item.reaction.as_str(),
        item.display_name(),
        item.id
    )
}

fn friendly_path(path: Option<PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/drive-gallery/config.yaml".to_string()
    }
}
