use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info};

use crate::assistant::truncate_text;

/// Everything except unreserved characters and the `/` separator.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Key>(.*?)</Key>").expect("valid key regex"));
static TRUNCATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<IsTruncated>\s*(true|false)\s*</IsTruncated>").expect("valid truncated regex")
});
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<NextContinuationToken>(.*?)</NextContinuationToken>")
        .expect("valid continuation regex")
});
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);").expect("valid entity regex")
});

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("bucket request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bucket returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("failed reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed bucket listing: {0}")]
    MalformedListing(String),
}

/// Anonymous client for a publicly readable bucket.
pub struct PublicBucket {
    name: String,
    endpoint: String,
    http: HttpClient,
}

impl PublicBucket {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let endpoint = format!("https://{name}.s3.amazonaws.com");
        Self::with_endpoint(name, endpoint)
    }

    /// `endpoint` is the bucket root, e.g. `http://localhost:9000/my-bucket`.
    pub fn with_endpoint(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, quote_key(key))
    }

    /// Keys under `prefix` in listing order, fetched a page at a time.
    /// Each call starts a fresh listing.
    pub fn list_keys(
        &self,
        prefix: &str,
    ) -> impl Iterator<Item = Result<String, BucketError>> + '_ {
        let prefix = prefix.to_string();
        KeyPages::new(move |token: Option<&str>| self.fetch_page(&prefix, token))
    }

    fn fetch_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListingPage, BucketError> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = continuation {
            query.push(("continuation-token", token));
        }
        let response = self
            .http
            .get(format!("{}/", self.endpoint))
            .query(&query)
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(BucketError::Server {
                status: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }
        let page = parse_listing_page(&body)?;
        debug!(
            bucket = %self.name,
            keys = page.keys.len(),
            truncated = page.truncated,
            "fetched listing page"
        );
        Ok(page)
    }

    /// Upload a local file readable by the bucket owner; returns its URL.
    pub fn upload_public(&self, local_path: &Path, key: &str) -> Result<String, BucketError> {
        let body = std::fs::read(local_path).map_err(|source| BucketError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;
        let url = self.object_url(key);
        let response = self
            .http
            .put(&url)
            .header("x-amz-acl", "bucket-owner-full-control")
            .header(CONTENT_TYPE, content_type_for(local_path))
            .body(body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BucketError::Server {
                status: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }
        info!(url = %url, "uploaded object");
        Ok(url)
    }
}

/// Drains listing pages one at a time, following continuation tokens.
///
/// The sequence ends after the last page, after a truncated page that
/// carries no token, or right after the first error.
struct KeyPages<F> {
    fetch: F,
    pending: VecDeque<String>,
    continuation: Option<String>,
    exhausted: bool,
}

impl<F> KeyPages<F>
where
    F: FnMut(Option<&str>) -> Result<ListingPage, BucketError>,
{
    fn new(fetch: F) -> Self {
        Self {
            fetch,
            pending: VecDeque::new(),
            continuation: None,
            exhausted: false,
        }
    }
}

impl<F> Iterator for KeyPages<F>
where
    F: FnMut(Option<&str>) -> Result<ListingPage, BucketError>,
{
    type Item = Result<String, BucketError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.pending.pop_front() {
                return Some(Ok(key));
            }
            if self.exhausted {
                return None;
            }
            match (self.fetch)(self.continuation.as_deref()) {
                Ok(page) => {
                    self.pending.extend(page.keys);
                    self.exhausted = !page.truncated || page.next_token.is_none();
                    self.continuation = page.next_token;
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListingPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

/// Parse one ListObjectsV2 XML response.
fn parse_listing_page(xml: &str) -> Result<ListingPage, BucketError> {
    if !xml.contains("<ListBucketResult") {
        return Err(BucketError::MalformedListing(
            xml.chars().take(200).collect(),
        ));
    }
    let keys = KEY_RE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|found| unescape_xml(found.as_str()))
        .collect();
    let truncated = TRUNCATED_RE
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .is_some_and(|found| found.as_str() == "true");
    let next_token = TOKEN_RE
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|found| unescape_xml(found.as_str()))
        .filter(|token| !token.is_empty());
    Ok(ListingPage {
        keys,
        truncated,
        next_token,
    })
}

fn unescape_xml(raw: &str) -> String {
    ENTITY_RE
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Public HTTPS URL of an object in a virtual-hosted bucket.
pub fn public_url(bucket: &str, key: &str) -> String {
    format!("https://{bucket}.s3.amazonaws.com/{}", quote_key(key))
}

fn quote_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => "text/csv",
        _ => "application/json",
    }
}
