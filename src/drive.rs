use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::DEFAULT_DRIVE_BASE_URL;
use crate::item::{MediaItem, MediaKind, Reaction};

pub const THUMBNAIL_ENDPOINT: &str = "https://drive.google.com/thumbnail";
pub const FILE_VIEW_BASE: &str = "https://drive.google.com/file/d";
const LISTING_FIELDS: &str =
    "files(id,name,mimeType,thumbnailLink,webContentLink,size,createdTime),nextPageToken";
const PREVIEW_SIZE_SUFFIX: &str = "=s1200";

static THUMB_SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"=s\d+").expect("thumb size"));

/// One file record as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
    /// Byte count, sent as a decimal string.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub files: Vec<RawDescriptor>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingQuery {
    pub folder: String,
    pub credential: String,
    pub page_size: u32,
    pub shared_drive_id: Option<String>,
}

/// Anything that can return one page of the folder listing.
pub trait ListingSource: Send + Sync {
    fn get_page(&self, url: &Url) -> Result<ListingPage>;
}

pub fn listing_url(base: &Url, query: &ListingQuery, page_token: Option<&str>) -> Result<Url> {
    if query.folder.trim().is_empty() {
        bail!("drive: folder required");
    }
    let mut url = base.join("files").context("drive: build listing url")?;
    let filter = format!(
        "'{}' in parents and trashed=false and (mimeType contains 'image/' or mimeType contains 'video/')",
        query.folder
    );
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("q", &filter);
        pairs.append_pair("fields", LISTING_FIELDS);
        pairs.append_pair("key", &query.credential);
        pairs.append_pair("pageSize", &query.page_size.to_string());
        pairs.append_pair("orderBy", "name_natural");
        pairs.append_pair("supportsAllDrives", "true");
        pairs.append_pair("includeItemsFromAllDrives", "true");
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            pairs.append_pair("pageToken", token);
        }
        if let Some(drive_id) = query.shared_drive_id.as_deref().filter(|d| !d.is_empty()) {
            pairs.append_pair("corpora", "drive");
            pairs.append_pair("driveId", drive_id);
        }
    }
    Ok(url)
}

pub fn thumbnail_url(id: &str) -> String {
    format!("{THUMBNAIL_ENDPOINT}?id={id}&sz=w1200")
}

/// Embedded player page used when native playback fails.
pub fn embed_preview_url(id: &str) -> String {
    format!("{FILE_VIEW_BASE}/{id}/preview")
}

fn upscale_thumbnail(link: &str) -> String {
    THUMB_SIZE_RE
        .replace(link, PREVIEW_SIZE_SUFFIX)
        .into_owned()
}

pub fn content_url(base: &Url, id: &str, credential: &str) -> Result<Url> {
    let mut url = base
        .join(&format!("files/{id}"))
        .with_context(|| format!("drive: build content url for {id}"))?;
    url.query_pairs_mut()
        .append_pair("alt", "media")
        .append_pair("key", credential);
    Ok(url)
}

impl RawDescriptor {
    pub fn into_item(self, base: &Url, credential: &str) -> Result<MediaItem> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("drive: descriptor without id"));
        }
        let source_url = content_url(base, &self.id, credential)?.to_string();
        let preview_url = self
            .thumbnail_link
            .as_deref()
            .filter(|link| !link.trim().is_empty())
            .map(upscale_thumbnail)
            .unwrap_or_else(|| thumbnail_url(&self.id));
        let size_bytes = self
            .size
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok());
        let created_at = self
            .created_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|dt| dt.timestamp_millis());

        Ok(MediaItem {
            kind: MediaKind::from_mime(&self.mime_type),
            source_url,
            preview_url,
            name: self.name.filter(|n| !n.is_empty()),
            size_bytes,
            created_at,
            reaction: Reaction::None,
            origin_link: self.web_content_link.filter(|l| !l.trim().is_empty()),
            id: self.id,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("drive client user agent required");
        }
        let base = config
            .base_url
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DRIVE_BASE_URL.to_string());
        let base_url = Url::parse(&normalize_base(&base))?;
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl ListingSource for Client {
    fn get_page(&self, url: &Url) -> Result<ListingPage> {
        let resp = self
            .http
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("drive: send listing request")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return match status.as_u16() {
                403 => Err(anyhow!("drive: forbidden (is the folder shared?)")),
                404 => Err(anyhow!("drive: folder not found")),
                429 => Err(anyhow!("drive: rate limited: {}", body)),
                _ => Err(anyhow!("drive: api error {}: {}", status, body)),
            };
        }
        resp.json::<ListingPage>()
            .context("drive: decode listing page")
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
pub fn normalize_base(base: &str) -> String {
    let trimmed = base.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
