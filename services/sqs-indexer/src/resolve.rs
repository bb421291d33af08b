//! Metadata document and URI resolution from queue messages.
//!
//! Messages arrive either as bare metadata documents, SNS envelopes
//! wrapping one, or S3 event notifications pointing at one or more
//! documents in object storage. The locator decides where the document
//! URI comes from; documents not embedded in the message are fetched.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path as ObjectPath, ObjectStore};
use serde_json::Value;
use tracing::debug;

/// Strategy for locating the document URI within a message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataLocator {
    /// href of the `links[]` entry with rel == "self"; document is the
    /// payload itself.
    SelfLink,
    /// href of the `links[]` entry with this rel; document fetched from it.
    LinkRel(String),
    /// Dotted or slash-separated key path into the payload whose value is
    /// the document URI; document fetched from it.
    Path(Vec<String>),
}

const LINKS_REL_PREFIX: &str = "STAC-LINKS-REL:";

impl MetadataLocator {
    /// Parse the --odc-metadata-link argument.
    pub fn parse(spec: Option<&str>) -> Self {
        match spec {
            None => MetadataLocator::SelfLink,
            Some(s) if s.starts_with(LINKS_REL_PREFIX) => {
                MetadataLocator::LinkRel(s[LINKS_REL_PREFIX.len()..].to_string())
            }
            Some(s) => MetadataLocator::Path(
                s.split(|c| c == '.' || c == '/')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

/// Parse a raw message body, unwrapping an SNS envelope when present.
pub fn payload_from_message(body: &str) -> Result<Value> {
    let outer: Value = serde_json::from_str(body).context("Message body is not JSON")?;

    match outer.get("Message").and_then(Value::as_str) {
        Some(inner) => serde_json::from_str(inner).context("SNS Message field is not JSON"),
        None => Ok(outer),
    }
}

/// Find the href of a `links[]` entry by rel value.
pub fn link_href(doc: &Value, rel: &str) -> Option<String> {
    doc.get("links")?.as_array()?.iter().find_map(|link| {
        (link.get("rel").and_then(Value::as_str) == Some(rel))
            .then(|| link.get("href").and_then(Value::as_str))
            .flatten()
            .map(str::to_string)
    })
}

/// Walk a key path into a document.
pub fn value_at_path<'v>(doc: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(doc, |value, key| value.get(key))
}

/// Extract document URIs from an S3 event notification.
///
/// Keys not matching the pattern are dropped; the second count is how
/// many records were filtered out.
pub fn s3_record_uris(payload: &Value, pattern: &str) -> (Vec<String>, usize) {
    let mut uris = Vec::new();
    let mut skipped = 0;

    let records = payload
        .get("Records")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for record in &records {
        let bucket = record
            .pointer("/s3/bucket/name")
            .and_then(Value::as_str);
        let key = record.pointer("/s3/object/key").and_then(Value::as_str);

        if let (Some(bucket), Some(key)) = (bucket, key) {
            if key_matches(pattern, key) {
                uris.push(format!("s3://{}/{}", bucket, key));
            } else {
                debug!(key = %key, pattern = %pattern, "Key filtered out by record path");
                skipped += 1;
            }
        }
    }

    (uris, skipped)
}

/// Match an object key against a path pattern where `*` matches any
/// single path segment.
fn key_matches(pattern: &str, key: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let key_segments: Vec<&str> = key.split('/').collect();

    if pattern_segments.len() != key_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(&key_segments)
        .all(|(p, k)| *p == "*" || p == k)
}

/// Fetches metadata documents by URI.
pub struct DocumentFetcher {
    http: reqwest::Client,
}

impl DocumentFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http })
    }

    /// Fetch and parse a document from an http(s):// or s3:// URI.
    pub async fn fetch(&self, uri: &str) -> Result<Value> {
        debug!(uri = %uri, "Fetching metadata document");

        let bytes = if let Some(remainder) = uri.strip_prefix("s3://") {
            self.fetch_s3(remainder).await?
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            self.fetch_http(uri).await?
        } else {
            return Err(anyhow!("Unsupported URI scheme: {}", uri));
        };

        parse_document(uri, &bytes)
    }

    async fn fetch_http(&self, uri: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .with_context(|| format!("Request failed for {}", uri))?;

        if !response.status().is_success() {
            return Err(anyhow!("Fetch failed for {}: {}", uri, response.status()));
        }

        Ok(response.bytes().await?)
    }

    async fn fetch_s3(&self, bucket_and_key: &str) -> Result<Bytes> {
        let (bucket, key) = bucket_and_key
            .split_once('/')
            .ok_or_else(|| anyhow!("Invalid s3 URI: s3://{}", bucket_and_key))?;

        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .with_context(|| format!("Failed to create S3 client for bucket {}", bucket))?;

        let result = store
            .get(&ObjectPath::from(key))
            .await
            .with_context(|| format!("Failed to fetch s3://{}/{}", bucket, key))?;

        Ok(result.bytes().await?)
    }
}

/// Parse document bytes, by extension: YAML for .yaml/.yml, JSON otherwise.
fn parse_document(uri: &str, bytes: &[u8]) -> Result<Value> {
    let lowered = uri.to_ascii_lowercase();
    if lowered.ends_with(".yaml") || lowered.ends_with(".yml") {
        serde_yaml::from_slice(bytes).with_context(|| format!("Invalid YAML document at {}", uri))
    } else {
        serde_json::from_slice(bytes).with_context(|| format!("Invalid JSON document at {}", uri))
    }
}
