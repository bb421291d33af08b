//! Minimal STAC search API client.
//!
//! Speaks the POST `/search` endpoint and follows `next` links in the
//! shapes deployments actually use: a full POST body, a partial body
//! with `"merge": true` layered over the previous request, or a plain
//! href to GET.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use dc_common::{DcError, DcResult};

/// Page size requested from the API.
const PAGE_LIMIT: usize = 100;

/// Search query terms.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub collections: Vec<String>,
    pub bbox: Option<[f64; 4]>,
    pub datetime: Option<String>,
}

impl SearchParams {
    /// Render the POST /search request body.
    pub fn to_body(&self, limit: usize) -> Value {
        let mut body = json!({ "limit": limit });
        if !self.collections.is_empty() {
            body["collections"] = json!(self.collections);
        }
        if let Some(bbox) = self.bbox {
            body["bbox"] = json!(bbox);
        }
        if let Some(datetime) = &self.datetime {
            body["datetime"] = json!(datetime);
        }
        body
    }
}

/// The request that fetches one page of results.
#[derive(Debug, Clone, PartialEq)]
enum PageRequest {
    Post { url: String, body: Value },
    Get { url: String },
}

/// Client for a STAC search API.
pub struct StacSearch {
    client: Client,
    search_url: String,
}

impl StacSearch {
    /// Create a client for the given API root URL.
    pub fn new(api_url: &str) -> DcResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| DcError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            search_url: format!("{}/search", api_url.trim_end_matches('/')),
        })
    }

    /// Total number of items matching the search.
    pub async fn found(&self, params: &SearchParams) -> DcResult<u64> {
        let page = self.post(&self.search_url, &params.to_body(1)).await?;
        matched_count(&page)
            .ok_or_else(|| DcError::HttpError("search response has no match count".to_string()))
    }

    /// Fetch matching items, following `next` links up to `limit`.
    pub async fn items(
        &self,
        params: &SearchParams,
        limit: Option<usize>,
    ) -> DcResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut request = PageRequest::Post {
            url: self.search_url.clone(),
            body: params.to_body(page_size(limit, 0)),
        };

        loop {
            let page = match &request {
                PageRequest::Post { url, body } => self.post(url, body).await?,
                PageRequest::Get { url } => self.get(url).await?,
            };

            let features = page
                .get("features")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if features.is_empty() {
                break;
            }

            for feature in features {
                items.push(feature);
                if let Some(limit) = limit {
                    if items.len() >= limit {
                        return Ok(items);
                    }
                }
            }

            // Merge semantics need the body we just sent; GET pages fall
            // back to the original terms.
            let previous = match &request {
                PageRequest::Post { body, .. } => body.clone(),
                PageRequest::Get { .. } => params.to_body(page_size(limit, items.len())),
            };

            match next_request(&page, &previous, &self.search_url) {
                Some(PageRequest::Post { url, mut body }) => {
                    if let Some(obj) = body.as_object_mut() {
                        obj.insert(
                            "limit".to_string(),
                            json!(page_size(limit, items.len())),
                        );
                    }
                    request = PageRequest::Post { url, body };
                }
                Some(next) => request = next,
                None => break,
            }
        }

        Ok(items)
    }

    async fn post(&self, url: &str, body: &Value) -> DcResult<Value> {
        debug!(url = %url, "Searching STAC API");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| DcError::HttpError(format!("Search request failed: {}", e)))?;

        parse_response(response).await
    }

    async fn get(&self, url: &str) -> DcResult<Value> {
        debug!(url = %url, "Fetching next results page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DcError::HttpError(format!("Search request failed: {}", e)))?;

        parse_response(response).await
    }
}

async fn parse_response(response: reqwest::Response) -> DcResult<Value> {
    if !response.status().is_success() {
        return Err(DcError::HttpError(format!(
            "Search failed: {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| DcError::HttpError(format!("Invalid search response: {}", e)))
}

fn page_size(limit: Option<usize>, already: usize) -> usize {
    match limit {
        Some(limit) => PAGE_LIMIT.min(limit.saturating_sub(already)).max(1),
        None => PAGE_LIMIT,
    }
}

/// Extract the match count from a search response.
///
/// STAC API 1.0 uses `numberMatched`; older deployments nest it under
/// `context.matched`.
pub fn matched_count(page: &Value) -> Option<u64> {
    page.get("numberMatched")
        .and_then(Value::as_u64)
        .or_else(|| {
            page.get("context")
                .and_then(|c| c.get("matched"))
                .and_then(Value::as_u64)
        })
}

/// Build the request for the next page from the response's `next` link.
///
/// A link with a `body` is POSTed (layered over `previous` when it says
/// `"merge": true`); a link with `method: POST` but no body re-sends the
/// previous body to its href; anything else is a plain GET of the href.
fn next_request(page: &Value, previous: &Value, search_url: &str) -> Option<PageRequest> {
    let link = page
        .get("links")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))?;

    let url = link
        .get("href")
        .and_then(Value::as_str)
        .unwrap_or(search_url)
        .to_string();
    let method = link.get("method").and_then(Value::as_str).unwrap_or("GET");

    match link.get("body") {
        Some(body) => {
            let body = if link.get("merge").and_then(Value::as_bool) == Some(true) {
                let mut merged = previous.clone();
                if let (Some(into), Some(from)) = (merged.as_object_mut(), body.as_object()) {
                    for (key, value) in from {
                        into.insert(key.clone(), value.clone());
                    }
                }
                merged
            } else {
                body.clone()
            };
            Some(PageRequest::Post { url, body })
        }
        None if method.eq_ignore_ascii_case("POST") => Some(PageRequest::Post {
            url,
            body: previous.clone(),
        }),
        None => Some(PageRequest::Get { url }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_URL: &str = "https://api/search";

    #[test]
    fn test_body_includes_only_set_terms() {
        let params = SearchParams {
            collections: vec!["sentinel-s2-l2a-cogs".to_string()],
            bbox: Some([147.0, -35.0, 149.0, -33.0]),
            datetime: None,
        };
        let body = params.to_body(50);
        assert_eq!(body["limit"], 50);
        assert_eq!(body["collections"][0], "sentinel-s2-l2a-cogs");
        assert_eq!(body["bbox"][3], -33.0);
        assert!(body.get("datetime").is_none());
    }

    #[test]
    fn test_matched_count_number_matched() {
        let page = json!({"numberMatched": 42, "features": []});
        assert_eq!(matched_count(&page), Some(42));
    }

    #[test]
    fn test_matched_count_context_fallback() {
        let page = json!({"context": {"matched": 7}, "features": []});
        assert_eq!(matched_count(&page), Some(7));
    }

    #[test]
    fn test_next_link_with_full_body() {
        let page = json!({
            "features": [],
            "links": [
                {"rel": "self", "href": SEARCH_URL},
                {"rel": "next", "href": SEARCH_URL, "method": "POST",
                 "body": {"token": "page2", "limit": 100}}
            ]
        });
        let previous = json!({"collections": ["c1"], "limit": 100});

        let next = next_request(&page, &previous, SEARCH_URL).unwrap();
        assert_eq!(
            next,
            PageRequest::Post {
                url: SEARCH_URL.to_string(),
                body: json!({"token": "page2", "limit": 100}),
            }
        );
    }

    #[test]
    fn test_next_link_merges_partial_body_over_request() {
        let page = json!({
            "features": [],
            "links": [
                {"rel": "next", "href": SEARCH_URL, "method": "POST",
                 "merge": true, "body": {"token": "page2"}}
            ]
        });
        let previous = json!({
            "collections": ["c1"],
            "bbox": [147.0, -35.0, 149.0, -33.0],
            "limit": 100
        });

        let next = next_request(&page, &previous, SEARCH_URL).unwrap();
        let PageRequest::Post { body, .. } = next else {
            panic!("expected a POST request");
        };
        // Search terms survive the merge; the token is layered on top.
        assert_eq!(body["collections"][0], "c1");
        assert_eq!(body["bbox"][0], 147.0);
        assert_eq!(body["token"], "page2");
    }

    #[test]
    fn test_href_only_next_link_is_a_get() {
        let page = json!({
            "features": [],
            "links": [{"rel": "next", "href": "https://api/search?token=page2"}]
        });
        let previous = json!({"limit": 100});

        let next = next_request(&page, &previous, SEARCH_URL).unwrap();
        assert_eq!(
            next,
            PageRequest::Get {
                url: "https://api/search?token=page2".to_string(),
            }
        );
    }

    #[test]
    fn test_post_next_link_without_body_resends_request() {
        let page = json!({
            "features": [],
            "links": [{"rel": "next", "href": "https://api/search?page=2", "method": "POST"}]
        });
        let previous = json!({"collections": ["c1"], "limit": 100});

        let next = next_request(&page, &previous, SEARCH_URL).unwrap();
        assert_eq!(
            next,
            PageRequest::Post {
                url: "https://api/search?page=2".to_string(),
                body: previous,
            }
        );
    }

    #[test]
    fn test_no_next_link() {
        let page = json!({"features": [], "links": [{"rel": "self", "href": "x"}]});
        assert!(next_request(&page, &json!({}), SEARCH_URL).is_none());
    }

    #[test]
    fn test_page_size_respects_remaining_limit() {
        assert_eq!(page_size(None, 0), 100);
        assert_eq!(page_size(Some(250), 200), 50);
        assert_eq!(page_size(Some(10), 0), 10);
        // Never request zero items even when the limit is exhausted.
        assert_eq!(page_size(Some(10), 10), 1);
    }
}
