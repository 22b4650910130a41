use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::ImageFormat;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::item::MediaItem;
use crate::storage::{self, MediaEntry};

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub max_size_bytes: i64,
    pub default_ttl: Duration,
    pub workers: usize,
    /// Saves above this size go to the origin link instead of being fetched.
    pub large_download_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            download_dir: None,
            max_size_bytes: 500 * 1024 * 1024,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            workers: 2,
            large_download_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Hands a URL to something outside the terminal.
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

pub struct SystemBrowser;

impl LinkOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        webbrowser::open(url).with_context(|| format!("open {url} in browser"))
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Preview {
        id: String,
        url: String,
        ttl: Option<Duration>,
        force: bool,
    },
    Save(MediaItem),
}

#[derive(Debug, Clone)]
pub struct Preview {
    pub entry: MediaEntry,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(PathBuf),
    OpenedLink(String),
}

#[derive(Debug)]
pub enum Completion {
    Preview { id: String, result: Result<Preview> },
    Save { id: String, result: Result<SaveOutcome> },
}

struct Inner {
    store: Arc<storage::Store>,
    cfg: Config,
    cache_dir: PathBuf,
    client: Client,
    opener: Arc<dyn LinkOpener>,
    jobs: Sender<Request>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
    stop: Sender<()>,
    pruning: Mutex<()>,
}

/// Cheap clonable access to the worker pool.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    pub fn enqueue(&self, request: Request) {
        let _ = self.inner.jobs.send(request);
    }

    /// Everything finished since the last call.
    pub fn completions(&self) -> Vec<Completion> {
        self.inner.done_rx.try_iter().collect()
    }

    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        self.inner.done_rx.recv_timeout(timeout).ok()
    }
}

pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(
        store: Arc<storage::Store>,
        cfg: Config,
        opener: Arc<dyn LinkOpener>,
    ) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }
        let cache_dir = cfg
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create {}", cache_dir.display()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("media: build http client")?;

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let inner = Arc::new(Inner {
            store,
            cfg,
            cache_dir,
            client,
            opener,
            jobs: job_tx,
            done_tx,
            done_rx,
            stop: stop_tx,
            pruning: Mutex::new(()),
        });

        if let Err(err) = inner.prune_expired() {
            warn!(error = %format!("{err:#}"), "media: expiry sweep failed");
        }

        let mut handles = Vec::new();
        for idx in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            let spawned = thread::Builder::new()
                .name(format!("media-{idx}"))
                .spawn(move || worker_inner.worker(rx_jobs, rx_stop))
                .context("media: spawn worker")?;
            handles.push(spawned);
        }

        Ok(Self { inner, handles })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Request>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(request) => self.process(request),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, request: Request) {
        let completion = match request {
            Request::Preview {
                id,
                url,
                ttl,
                force,
            } => {
                let result = self.preview(&url, ttl, force);
                if let Err(err) = &result {
                    debug!(%id, error = %format!("{err:#}"), "media: preview failed");
                }
                Completion::Preview { id, result }
            }
            Request::Save(item) => Completion::Save {
                id: item.id.clone(),
                result: self.save(&item),
            },
        };
        let _ = self.done_tx.send(completion);
    }

    fn preview(&self, url: &str, ttl: Option<Duration>, force: bool) -> Result<Preview> {
        if url.is_empty() {
            return Err(anyhow!("media: url required"));
        }

        if let Some(entry) = self.store.get_media_entry_by_url(url)? {
            if !force && self.is_fresh(&entry, ttl) && Path::new(&entry.file_path).exists() {
                return Ok(Preview {
                    width: entry.width.max(0) as u32,
                    height: entry.height.max(0) as u32,
                    entry,
                });
            }
        }

        let (bytes, content_type) = self.get_bytes(url)?;
        let (width, height) = image::load_from_memory(&bytes)
            .map(|img| (img.width(), img.height()))
            .context("media: decode preview")?;

        let file_path = self.write_file(&bytes)?;
        let ttl = ttl.unwrap_or(self.cfg.default_ttl);
        let expires_at = SystemTime::now().checked_add(ttl);

        let media_entry = MediaEntry {
            id: 0,
            url: url.to_string(),
            media_type: content_type.unwrap_or_else(|| detect_mime(&bytes)),
            file_path,
            width: width as i64,
            height: height as i64,
            size_bytes: bytes.len() as i64,
            fetched_at: Utc::now(),
            expires_at: expires_at.map(DateTime::<Utc>::from),
            checksum: sha1_hex(&bytes),
        };

        self.prune_if_needed(media_entry.size_bytes)?;
        let id = self.store.upsert_media_entry(media_entry.clone())?;
        Ok(Preview {
            entry: MediaEntry { id, ..media_entry },
            width,
            height,
        })
    }

    fn save(&self, item: &MediaItem) -> Result<SaveOutcome> {
        let origin = item
            .origin_link
            .as_deref()
            .filter(|link| !link.trim().is_empty());

        if let Some(link) = origin {
            if item.size_bytes.unwrap_or(0) > self.cfg.large_download_bytes {
                info!(id = %item.id, "media: large item, opening origin link");
                self.opener.open(link)?;
                return Ok(SaveOutcome::OpenedLink(link.to_string()));
            }
        }

        match self.download(item) {
            Ok(path) => {
                info!(id = %item.id, path = %path.display(), "media: saved");
                Ok(SaveOutcome::Written(path))
            }
            Err(err) => {
                warn!(id = %item.id, error = %format!("{err:#}"), "media: save failed, opening link");
                let link = origin.unwrap_or(&item.source_url);
                self.opener
                    .open(link)
                    .with_context(|| format!("fallback after: {err:#}"))?;
                Ok(SaveOutcome::OpenedLink(link.to_string()))
            }
        }
    }

    fn download(&self, item: &MediaItem) -> Result<PathBuf> {
        let dir = self
            .cfg
            .download_dir
            .as_ref()
            .context("media: download dir not configured")?;
        fs::create_dir_all(dir).with_context(|| format!("media: create {}", dir.display()))?;
        let (bytes, _) = self.get_bytes(&item.source_url)?;
        let path = unique_path(dir, &file_name_for(item));
        fs::write(&path, &bytes).with_context(|| format!("media: write {}", path.display()))?;
        Ok(path)
    }

    fn get_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self.client.get(url).send().context("media: download")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("media: request failed: {} - {}", status, body));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response.bytes().context("media: body")?.to_vec();
        Ok((bytes, content_type))
    }

    fn is_fresh(&self, entry: &MediaEntry, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.cfg.default_ttl);
        if ttl.is_zero() {
            return false;
        }
        let expiry = entry.fetched_at.checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0)),
        );
        match expiry {
            Some(expiry) => Utc::now() < expiry,
            None => false,
        }
    }

    fn write_file(&self, data: &[u8]) -> Result<String> {
        let filename = format!("{}.bin", sha1_hex(data));
        let path = self.cache_dir.join(filename);
        fs::write(&path, data).context("media: write")?;
        Ok(path.to_string_lossy().to_string())
    }

    fn prune_expired(&self) -> Result<()> {
        let expired = self.store.list_expired_media(Utc::now(), 500)?;
        if expired.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = expired.iter().map(|entry| entry.id).collect();
        self.store.delete_media_entries(&ids)?;
        for entry in expired {
            let _ = fs::remove_file(entry.file_path);
        }
        debug!(count = ids.len(), "media: pruned expired previews");
        Ok(())
    }

    fn prune_if_needed(&self, new_bytes: i64) -> Result<()> {
        let _guard = self.pruning.lock();
        let mut total = self.store.total_media_size()? + new_bytes;
        if total <= self.cfg.max_size_bytes {
            return Ok(());
        }

        let mut ids = Vec::new();
        let mut paths = Vec::new();

        for entry in self.store.list_oldest_media(100)? {
            total -= entry.size_bytes;
            ids.push(entry.id);
            paths.push(entry.file_path);
            if total <= self.cfg.max_size_bytes {
                break;
            }
        }

        self.store.delete_media_entries(&ids)?;
        for path in paths {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("drive-gallery"))
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

/// The item's name with path separators and control characters replaced.
fn file_name_for(item: &MediaItem) -> String {
    let cleaned: String = item
        .display_name()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        item.id.clone()
    } else {
        cleaned
    }
}

/// `name.ext`, then `name (1).ext`, `name (2).ext`... until nothing is in the way.
fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;
    use tiny_http::{Header, Response, Server};

    use super::*;
    use crate::item::MediaKind;
    use crate::storage::Store;

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl LinkOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<()> {
            self.opened.lock().push(url.to_string());
            Ok(())
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Serves `body` for every path except `/missing`, counting requests.
    fn serve(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for req in server.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                if req.url() == "/missing" {
                    let _ = req.respond(Response::from_string("gone").with_status_code(404));
                    continue;
                }
                let header = Header::from_bytes("Content-Type", "image/png").unwrap();
                let _ = req.respond(Response::from_data(body.clone()).with_header(header));
            }
        });
        (format!("http://127.0.0.1:{port}"), hits)
    }

    fn manager(dirs: &TempDir, opener: Arc<RecordingOpener>) -> Manager {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cfg = Config {
            cache_dir: Some(dirs.path().join("cache")),
            download_dir: Some(dirs.path().join("downloads")),
            workers: 1,
            large_download_bytes: 1024,
            ..Config::default()
        };
        Manager::new(store, cfg, opener).unwrap()
    }

    fn item(id: &str, url: &str, size: Option<u64>, origin: Option<&str>) -> MediaItem {
        MediaItem {
            id: id.into(),
            kind: MediaKind::Image,
            source_url: url.into(),
            preview_url: url.into(),
            name: Some(format!("{id}.png")),
            size_bytes: size,
            created_at: None,
            reaction: Default::default(),
            origin_link: origin.map(str::to_string),
        }
    }

    fn next(handle: &Handle) -> Completion {
        handle.wait_completion(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn preview_is_cached_with_dimensions() {
        let dirs = TempDir::new().unwrap();
        let (base, hits) = serve(png(6, 3));
        let manager = manager(&dirs, Arc::default());
        let handle = manager.handle();
        let url = format!("{base}/thumb");

        for _ in 0..2 {
            handle.enqueue(Request::Preview {
                id: "a".into(),
                url: url.clone(),
                ttl: None,
                force: false,
            });
            match next(&handle) {
                Completion::Preview { id, result } => {
                    let preview = result.unwrap();
                    assert_eq!(id, "a");
                    assert_eq!((preview.width, preview.height), (6, 3));
                    assert!(Path::new(&preview.entry.file_path).exists());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn small_item_is_written_to_downloads() {
        let dirs = TempDir::new().unwrap();
        let (base, _) = serve(png(2, 2));
        let opener = Arc::new(RecordingOpener::default());
        let manager = manager(&dirs, opener.clone());
        let handle = manager.handle();

        handle.enqueue(Request::Save(item("pic", &format!("{base}/pic"), Some(10), None)));
        let Completion::Save { result, .. } = next(&handle) else {
            panic!("expected save completion");
        };
        let expected = dirs.path().join("downloads").join("pic.png");
        assert_eq!(result.unwrap(), SaveOutcome::Written(expected.clone()));
        assert!(expected.exists());
        assert!(opener.opened.lock().is_empty());
    }

    #[test]
    fn large_item_opens_origin_link_without_fetching() {
        let dirs = TempDir::new().unwrap();
        let (base, hits) = serve(png(2, 2));
        let opener = Arc::new(RecordingOpener::default());
        let manager = manager(&dirs, opener.clone());
        let handle = manager.handle();

        let big = item("big", &format!("{base}/big"), Some(4096), Some("https://drive/big"));
        handle.enqueue(Request::Save(big));
        let Completion::Save { result, .. } = next(&handle) else {
            panic!("expected save completion");
        };
        assert_eq!(
            result.unwrap(),
            SaveOutcome::OpenedLink("https://drive/big".into())
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_download_falls_back_to_link() {
        let dirs = TempDir::new().unwrap();
        let (base, _) = serve(png(2, 2));
        let opener = Arc::new(RecordingOpener::default());
        let manager = manager(&dirs, opener.clone());
        let handle = manager.handle();

        handle.enqueue(Request::Save(item(
            "gone",
            &format!("{base}/missing"),
            Some(10),
            Some("https://drive/gone"),
        )));
        let Completion::Save { result, .. } = next(&handle) else {
            panic!("expected save completion");
        };
        assert_eq!(
            result.unwrap(),
            SaveOutcome::OpenedLink("https://drive/gone".into())
        );
        assert_eq!(opener.opened.lock().as_slice(), ["https://drive/gone"]);
    }

    #[test]
    fn file_names_are_sanitized_and_unique() {
        let dirs = TempDir::new().unwrap();
        let mut named = item("x", "u", None, None);
        named.name = Some("../a/b.jpg".into());
        assert_eq!(file_name_for(&named), "_a_b.jpg");
        named.name = None;
        assert_eq!(file_name_for(&named), "x");

        fs::write(dirs.path().join("b.jpg"), b"1").unwrap();
        assert_eq!(unique_path(dirs.path(), "b.jpg"), dirs.path().join("b (1).jpg"));
        assert_eq!(unique_path(dirs.path(), "c.jpg"), dirs.path().join("c.jpg"));
    }
}
