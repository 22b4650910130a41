use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::drive::{self, ListingQuery, ListingSource, RawDescriptor};
use crate::retry::{CancelToken, RetryError, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("no folder or credential configured")]
    ConfigMissing,
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Network {
        url: String,
        message: String,
        attempts: u32,
    },
    #[error("No files found. Is the folder public?")]
    EmptyResult,
    #[error("fetch cancelled")]
    Cancelled,
}

/// Diagnostics for a single walk, owned by the caller so concurrent or
/// abandoned walks never overwrite each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchTrace {
    /// Redacted URL of the most recent page request.
    pub last_url: Option<String>,
    pub pages: usize,
}

/// Walks every page of a folder listing, retrying each page independently.
pub struct RemoteListingFetcher {
    source: Arc<dyn ListingSource>,
    base_url: Url,
    retry: RetryPolicy,
    page_size: u32,
    shared_drive_id: Option<String>,
}

impl RemoteListingFetcher {
    pub fn new(source: Arc<dyn ListingSource>, base_url: Url, retry: RetryPolicy) -> Self {
        Self {
            source,
            base_url,
            retry,
            page_size: 200,
            shared_drive_id: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_shared_drive(mut self, drive_id: Option<String>) -> Self {
        self.shared_drive_id = drive_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns every descriptor in the folder, or nothing at all.
    ///
    /// A page that exhausts its retry budget aborts the whole walk and the
    /// pages gathered so far are dropped. A listing that hands back a page
    /// token it already issued is treated as a network failure.
    pub fn fetch_all(
        &self,
        folder: &str,
        credential: &str,
        cancel: &CancelToken,
        trace: &mut FetchTrace,
    ) -> Result<Vec<RawDescriptor>, FetchError> {
        if folder.trim().is_empty() || credential.trim().is_empty() {
            return Err(FetchError::ConfigMissing);
        }
        let query = ListingQuery {
            folder: folder.trim().to_string(),
            credential: credential.trim().to_string(),
            page_size: self.page_size,
            shared_drive_id: self.shared_drive_id.clone(),
        };

        let mut out: Vec<RawDescriptor> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();

        loop {
            let url = drive::listing_url(&self.base_url, &query, page_token.as_deref()).map_err(
                |err| FetchError::Network {
                    url: self.base_url.to_string(),
                    message: format!("{err:#}"),
                    attempts: 0,
                },
            )?;
            trace.last_url = Some(redact_key(&url));

            let page = self
                .retry
                .execute(cancel, |attempt| {
                    debug!(page = trace.pages, attempt, "requesting listing page");
                    self.source.get_page(&url)
                })
                .map_err(|err| match err {
                    RetryError::Cancelled => FetchError::Cancelled,
                    RetryError::Exhausted { attempts, last } => FetchError::Network {
                        url: redact_key(&url),
                        message: format!("{last:#}"),
                        attempts,
                    },
                })?;

            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            trace.pages += 1;
            out.extend(page.files);
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            match &page_token {
                None => break,
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    return Err(FetchError::Network {
                        url: redact_key(&url),
                        message: format!("listing repeated page token {token:?}"),
                        attempts: 1,
                    });
                }
                Some(_) => {}
            }
        }

        info!(pages = trace.pages, files = out.len(), "folder listing complete");
        if out.is_empty() {
            return Err(FetchError::EmptyResult);
        }
        Ok(out)
    }
}

fn redact_key(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "key" { "…".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
