//! Elasticsearch [`IndexClient`] over HTTP.
//!
//! Every operation maps onto one REST endpoint:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `create_index` | `PUT /{index}` with the keyword mapping |
//! | `bulk_index` / `delete_bulk` | `POST /_bulk` (NDJSON) |
//! | `count` | `POST /{index}/_count` |
//! | `count_many` / `search_many` | `POST /_msearch` (NDJSON) |
//! | `search` | `POST /{index}/_search?scroll=..` then `POST /_search/scroll` |
//!
//! Request bodies and response parsing are plain functions so they can be
//! tested without a cluster.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use fbs_core::index::{
    BulkItemResult, DeleteSummary, IndexClient, IndexFilter, IndexedFile, SearchPage,
};
use fbs_core::{IndexDocument, SpatialEnvelope};

use crate::config::IndexConfig;

/// How long the cluster keeps a scroll context alive between pages.
const SCROLL_KEEP_ALIVE: &str = "5m";

enum Body {
    Empty,
    Json(Value),
    NdJson(String),
}

pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: String,
    index: String,
    auth: Option<String>,
    max_retries: u32,
}

impl ElasticsearchIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("index.url required for the elasticsearch backend"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let auth = match (&config.api_key_id, &config.api_key) {
            (Some(id), Some(key)) => Some(api_key_header(id, key)),
            _ => None,
        };
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            index: config.name.clone(),
            auth,
            max_retries: config.max_retries,
        })
    }

    /// Send one request, retrying network errors, 429 and 5xx with
    /// exponential backoff. Other statuses are returned to the caller.
    async fn request(&self, method: Method, path: &str, body: Body) -> Result<(StatusCode, Value)> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(url = %url, attempt, "retrying index request");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.request(method.clone(), &url);
            if let Some(auth) = &self.auth {
                req = req.header("Authorization", auth);
            }
            req = match &body {
                Body::Empty => req,
                Body::Json(value) => req.json(value),
                Body::NdJson(text) => req
                    .header("Content-Type", "application/x-ndjson")
                    .body(text.clone()),
            };

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("index error {} from {}: {}", status, url, text));
                        continue;
                    }
                    let text = response.text().await?;
                    let json = if text.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text)
                            .with_context(|| format!("Invalid JSON from {}", url))?
                    };
                    return Ok((status, json));
                }
                Err(e) => {
                    last_err = Some(anyhow::Error::new(e).context(format!("request to {} failed", url)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("index request failed after retries")))
    }

    async fn request_ok(&self, method: Method, path: &str, body: Body) -> Result<Value> {
        let (status, json) = self.request(method, path, body).await?;
        if !status.is_success() {
            bail!("index error {}: {}", status, error_reason(&json));
        }
        Ok(json)
    }

    async fn msearch(&self, filters: &[IndexFilter], size: usize) -> Result<Vec<Value>> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let body = msearch_body(&self.index, filters, size);
        let json = self.request_ok(Method::POST, "_msearch", Body::NdJson(body)).await?;
        let responses = parse_msearch(&json)?;
        if responses.len() != filters.len() {
            bail!(
                "msearch returned {} responses for {} queries",
                responses.len(),
                filters.len()
            );
        }
        Ok(responses)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let (status, json) = self
            .request(
                Method::DELETE,
                "_search/scroll",
                Body::Json(json!({ "scroll_id": [scroll_id] })),
            )
            .await?;
        // Already expired or cleared.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        bail!("failed to clear scroll {}: {}", status, error_reason(&json))
    }
}

#[async_trait]
impl IndexClient for ElasticsearchIndex {
    async fn create_index(&self) -> Result<()> {
        let (status, json) = self
            .request(Method::PUT, &self.index, Body::Json(index_mapping()))
            .await?;
        if status.is_success() || is_already_exists(&json) {
            return Ok(());
        }
        bail!(
            "failed to create index '{}': {} {}",
            self.index,
            status,
            error_reason(&json)
        )
    }

    async fn bulk_index(&self, docs: &[IndexDocument]) -> Result<Vec<BulkItemResult>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body = bulk_index_body(&self.index, docs)?;
        let json = self.request_ok(Method::POST, "_bulk", Body::NdJson(body)).await?;
        parse_bulk_response(&json)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<u64> {
        let path = format!("{}/_count", self.index);
        let json = self
            .request_ok(Method::POST, &path, Body::Json(json!({ "query": filter_query(filter) })))
            .await?;
        json.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("count response missing 'count'"))
    }

    async fn count_many(&self, filters: &[IndexFilter]) -> Result<Vec<u64>> {
        self.msearch(filters, 0)
            .await?
            .iter()
            .map(parse_total)
            .collect()
    }

    async fn search(
        &self,
        filter: &IndexFilter,
        size: usize,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let json = match cursor {
            None => {
                let path = format!("{}/_search?scroll={}", self.index, SCROLL_KEEP_ALIVE);
                self.request_ok(Method::POST, &path, Body::Json(search_body(filter, size)))
                    .await?
            }
            Some(scroll_id) => {
                self.request_ok(
                    Method::POST,
                    "_search/scroll",
                    Body::Json(json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id })),
                )
                .await?
            }
        };

        let hits = parse_hits(&json)?;
        let scroll_id = json
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let last_page = hits.len() < size || hits.is_empty();

        let next_cursor = match scroll_id {
            Some(id) if last_page => {
                if let Err(e) = self.clear_scroll(&id).await {
                    warn!(error = %format!("{:#}", e), "failed to clear scroll");
                }
                None
            }
            other => other,
        };
        Ok(SearchPage { hits, next_cursor })
    }

    async fn search_many(&self, filters: &[IndexFilter], size: usize) -> Result<Vec<SearchPage>> {
        self.msearch(filters, size)
            .await?
            .iter()
            .map(|response| {
                Ok(SearchPage {
                    hits: parse_hits(response)?,
                    next_cursor: None,
                })
            })
            .collect()
    }

    async fn release_cursor(&self, cursor: &str) -> Result<()> {
        self.clear_scroll(cursor).await
    }

    async fn delete_bulk(&self, ids: &[String]) -> Result<DeleteSummary> {
        if ids.is_empty() {
            return Ok(DeleteSummary::default());
        }
        let body = bulk_delete_body(&self.index, ids);
        let json = self.request_ok(Method::POST, "_bulk", Body::NdJson(body)).await?;
        Ok(DeleteSummary::from_items(parse_bulk_response(&json)?))
    }
}

/// `Authorization` header value for an API key pair.
pub fn api_key_header(id: &str, key: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", id, key));
    format!("ApiKey {}", encoded)
}

/// Mapping that makes the fields reconciliation filters on exact-match
/// keywords and the spatial coverage a geo shape.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "info": {
                    "properties": {
                        "directory": { "type": "keyword" },
                        "name": { "type": "keyword" },
                        "spot_name": { "type": "keyword" },
                        "location": { "type": "keyword" },
                        "type": { "type": "keyword" },
                        "format": { "type": "keyword" },
                        "read_status": { "type": "keyword" },
                        "user": { "type": "keyword" },
                        "group": { "type": "keyword" },
                        "size": { "type": "long" },
                        "last_modified": { "type": "date" },
                        "is_link": { "type": "boolean" },
                        "checksum": { "type": "keyword" },
                        "temporal": {
                            "properties": {
                                "start_time": { "type": "date" },
                                "end_time": { "type": "date" }
                            }
                        },
                        "phenomena": {
                            "type": "nested",
                            "properties": {
                                "names": { "type": "keyword" },
                                "agg_string": { "type": "keyword" }
                            }
                        },
                        "spatial": {
                            "properties": {
                                "coordinates": { "type": "geo_shape" }
                            }
                        }
                    }
                }
            }
        }
    })
}

pub fn filter_query(filter: &IndexFilter) -> Value {
    match filter {
        IndexFilter::All => json!({ "match_all": {} }),
        IndexFilter::Directory(dir) => json!({ "term": { "info.directory": dir } }),
        IndexFilter::Path { directory, name } => json!({
            "bool": {
                "filter": [
                    { "term": { "info.directory": directory } },
                    { "term": { "info.name": name } }
                ]
            }
        }),
        IndexFilter::Spot(spot) => json!({ "term": { "info.spot_name": spot } }),
    }
}

fn search_body(filter: &IndexFilter, size: usize) -> Value {
    json!({
        "query": filter_query(filter),
        "size": size,
        "sort": ["_doc"],
        "_source": ["info.directory", "info.name"]
    })
}

/// JSON sent for one document. Geo-shape envelopes are written in the
/// cluster's `[[min_lon, max_lat], [max_lon, min_lat]]` corner order.
pub fn es_document(doc: &IndexDocument) -> Result<Value> {
    let mut value = serde_json::to_value(doc)?;
    if let Some(spatial) = &doc.info.spatial {
        if let SpatialEnvelope::Envelope([[lon_min, lat_min], [lon_max, lat_max]]) =
            spatial.coordinates
        {
            if let Some(coordinates) = value.pointer_mut("/info/spatial/coordinates") {
                *coordinates = json!({
                    "type": "envelope",
                    "coordinates": [[lon_min, lat_max], [lon_max, lat_min]]
                });
            }
        }
    }
    Ok(value)
}

pub fn bulk_index_body(index: &str, docs: &[IndexDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&es_document(doc)?.to_string());
        body.push('\n');
    }
    Ok(body)
}

pub fn bulk_delete_body(index: &str, ids: &[String]) -> String {
    let mut body = String::new();
    for id in ids {
        body.push_str(&json!({ "delete": { "_index": index, "_id": id } }).to_string());
        body.push('\n');
    }
    body
}

/// One header/body pair per filter. `size == 0` asks for exact totals only.
pub fn msearch_body(index: &str, filters: &[IndexFilter], size: usize) -> String {
    let mut body = String::new();
    for filter in filters {
        body.push_str(&json!({ "index": index }).to_string());
        body.push('\n');
        let query = if size == 0 {
            json!({ "query": filter_query(filter), "size": 0, "track_total_hits": true })
        } else {
            json!({
                "query": filter_query(filter),
                "size": size,
                "_source": ["info.directory", "info.name"]
            })
        };
        body.push_str(&query.to_string());
        body.push('\n');
    }
    body
}

/// Per-item results of a `_bulk` response, in request order.
pub fn parse_bulk_response(json: &Value) -> Result<Vec<BulkItemResult>> {
    let items = json
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("bulk response missing 'items'"))?;

    items
        .iter()
        .map(|item| {
            let result = item
                .as_object()
                .and_then(|obj| obj.values().next())
                .ok_or_else(|| anyhow!("empty bulk item"))?;
            let id = result
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let status = result
                .get("status")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u16;
            Ok(match result.get("error") {
                Some(error) => BulkItemResult::failed(id, status, error_reason(error)),
                None if (200..300).contains(&status) => BulkItemResult::ok(id, status),
                // Delete of an absent id carries no error object.
                None => BulkItemResult::failed(
                    id,
                    status,
                    result
                        .get("result")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown"),
                ),
            })
        })
        .collect()
}

fn parse_msearch(json: &Value) -> Result<Vec<Value>> {
    let responses = json
        .get("responses")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("msearch response missing 'responses'"))?;
    responses
        .iter()
        .map(|r| match r.get("error") {
            Some(error) => Err(anyhow!("msearch query failed: {}", error_reason(error))),
            None => Ok(r.clone()),
        })
        .collect()
}

/// `hits.total` as either a bare number or `{ "value": n }`.
pub fn parse_total(json: &Value) -> Result<u64> {
    let total = json
        .pointer("/hits/total")
        .ok_or_else(|| anyhow!("search response missing 'hits.total'"))?;
    total
        .as_u64()
        .or_else(|| total.get("value").and_then(Value::as_u64))
        .ok_or_else(|| anyhow!("unreadable hits.total: {}", total))
}

pub fn parse_hits(json: &Value) -> Result<Vec<IndexedFile>> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("search response missing 'hits.hits'"))?;
    hits.iter()
        .map(|hit| {
            let field = |name: &str| {
                hit.pointer(&format!("/_source/info/{}", name))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("hit missing info.{}", name))
            };
            Ok(IndexedFile {
                id: hit
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                directory: field("directory")?,
                name: field("name")?,
            })
        })
        .collect()
}

fn is_already_exists(json: &Value) -> bool {
    json.pointer("/error/type").and_then(Value::as_str) == Some("resource_already_exists_exception")
}

/// Human-readable reason from an error object or error response.
fn error_reason(json: &Value) -> String {
    let error = json.get("error").unwrap_or(json);
    match error {
        Value::String(s) => s.clone(),
        Value::Null => "no response body".to_string(),
        _ => {
            let kind = error.get("type").and_then(Value::as_str);
            let reason = error.get("reason").and_then(Value::as_str);
            match (kind, reason) {
                (Some(k), Some(r)) => format!("{}: {}", k, r),
                (Some(k), None) => k.to_string(),
                (None, Some(r)) => r.to_string(),
                (None, None) => error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbs_core::models::{split_path, FileMetadata, ReadStatus, LOCATION_ON_DISK};

    fn doc(path: &str, spatial: Option<SpatialEnvelope>) -> IndexDocument {
        let (directory, name) = split_path(path);
        let file = FileMetadata {
            name,
            directory,
            location: LOCATION_ON_DISK.to_string(),
            size: 42,
            last_modified: chrono::DateTime::from_timestamp(0, 0).unwrap(),
            user: "badc".to_string(),
            group: "byacl".to_string(),
            uid: 0,
            gid: 0,
            is_link: false,
            file_type: ".nc".to_string(),
            checksum: None,
            read_status: ReadStatus::Successful,
            format: Some("NetCDF".to_string()),
            temporal: None,
        };
        IndexDocument::new(file, None, spatial, Some("spot-a".to_string()))
    }

    #[test]
    fn test_api_key_header() {
        assert_eq!(api_key_header("id", "secret"), "ApiKey aWQ6c2VjcmV0");
    }

    #[test]
    fn test_filter_queries_use_keyword_terms() {
        assert_eq!(
            filter_query(&IndexFilter::Directory("/badc/a".into())),
            json!({ "term": { "info.directory": "/badc/a" } })
        );
        let path = filter_query(&IndexFilter::path("/badc/a/x.nc"));
        assert_eq!(path["bool"]["filter"][0]["term"]["info.directory"], "/badc/a");
        assert_eq!(path["bool"]["filter"][1]["term"]["info.name"], "x.nc");
        assert_eq!(
            filter_query(&IndexFilter::Spot("s".into())),
            json!({ "term": { "info.spot_name": "s" } })
        );
    }

    #[test]
    fn test_envelope_is_written_in_cluster_order() {
        let d = doc(
            "/badc/a/x.nc",
            SpatialEnvelope::envelope(-10.0, 40.0, 20.0, 60.0),
        );
        let value = es_document(&d).unwrap();
        assert_eq!(
            value["info"]["spatial"]["coordinates"],
            json!({ "type": "envelope", "coordinates": [[-10.0, 60.0], [20.0, 40.0]] })
        );
        assert_eq!(value["info"]["directory"], "/badc/a");
        assert!(value.get("id").is_none());

        let track = doc("/badc/a/y.nc", SpatialEnvelope::track(&[(1.0, 2.0), (3.0, 4.0)]));
        assert_eq!(
            es_document(&track).unwrap()["info"]["spatial"]["coordinates"]["type"],
            "linestring"
        );
    }

    #[test]
    fn test_bulk_bodies_are_ndjson() {
        let d = doc("/badc/a/x.nc", None);
        let body = bulk_index_body("ceda-fbi", std::slice::from_ref(&d)).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], d.id.as_str());
        assert_eq!(action["index"]["_index"], "ceda-fbi");
        assert!(body.ends_with('\n'));

        let body = bulk_delete_body("ceda-fbi", &["a".to_string(), "b".to_string()]);
        assert_eq!(body.lines().count(), 2);
        assert!(body.starts_with(r#"{"delete":{"#));
    }

    #[test]
    fn test_msearch_body_counts_only() {
        let filters = vec![
            IndexFilter::Directory("/a".into()),
            IndexFilter::Directory("/b".into()),
        ];
        let body = msearch_body("idx", &filters, 0);
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({ "index": "idx" }));
        assert_eq!(lines[1]["size"], 0);
        assert_eq!(lines[1]["track_total_hits"], true);
        assert_eq!(lines[3]["query"]["term"]["info.directory"], "/b");

        let body = msearch_body("idx", &filters[..1], 2);
        assert!(body.contains(r#""size":2"#));
    }

    #[test]
    fn test_parse_bulk_response() {
        let json = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "index": { "_id": "b", "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "bad geo" } } },
                { "delete": { "_id": "c", "status": 404, "result": "not_found" } }
            ]
        });
        let items = parse_bulk_response(&json).unwrap();
        assert_eq!(items[0], BulkItemResult::ok("a", 201));
        assert_eq!(
            items[1],
            BulkItemResult::failed("b", 400, "mapper_parsing_exception: bad geo")
        );
        assert_eq!(items[2], BulkItemResult::failed("c", 404, "not_found"));
        assert!(parse_bulk_response(&json!({})).is_err());
    }

    #[test]
    fn test_parse_totals_and_hits() {
        assert_eq!(parse_total(&json!({ "hits": { "total": 7 } })).unwrap(), 7);
        assert_eq!(
            parse_total(&json!({ "hits": { "total": { "value": 3, "relation": "eq" } } })).unwrap(),
            3
        );
        let page = json!({
            "hits": { "hits": [
                { "_id": "1", "_source": { "info": { "directory": "/a", "name": "x.nc" } } }
            ] }
        });
        let hits = parse_hits(&page).unwrap();
        assert_eq!(hits[0].path(), "/a/x.nc");

        let responses = json!({ "responses": [
            { "hits": { "total": 1, "hits": [] } },
            { "error": { "type": "index_not_found_exception", "reason": "no such index" } }
        ] });
        let err = parse_msearch(&responses).unwrap_err();
        assert!(err.to_string().contains("index_not_found_exception"));
    }

    #[test]
    fn test_already_exists_is_recognized() {
        let json = json!({ "error": { "type": "resource_already_exists_exception" }, "status": 400 });
        assert!(is_already_exists(&json));
        assert!(!is_already_exists(&json!({ "acknowledged": true })));
    }

    #[test]
    fn test_new_requires_url() {
        let config = IndexConfig::default();
        assert!(ElasticsearchIndex::new(&config).is_err());
        let config = IndexConfig {
            url: Some("http://localhost:9200/".to_string()),
            ..IndexConfig::default()
        };
        let index = ElasticsearchIndex::new(&config).unwrap();
        assert_eq!(index.base_url, "http://localhost:9200");
        assert_eq!(index.index, "ceda-fbi");
    }
}
