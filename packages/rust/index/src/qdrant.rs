//! Qdrant REST client for the hybrid (dense + sparse) chunk index.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use companyintel_shared::{
    BackendSettings, Chunk, CompanyIntelError, IndexConfig, Result, SearchHit, SparseVector,
    normalize_company,
};

/// Name of the dense vector in each point.
pub const DENSE_VECTOR: &str = "dense";
/// Name of the sparse vector in each point.
pub const SPARSE_VECTOR: &str = "sparse";

/// Payload fields with keyword indexes.
const INDEXED_FIELDS: [&str; 2] = ["company", "source_type"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    payload: Option<PointPayload>,
}

/// Payload stored with every point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PointPayload {
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    company: String,
    #[serde(default)]
    source_type: String,
    #[serde(default)]
    chunk_index: usize,
    #[serde(default)]
    scraped_at: String,
}

impl From<PointPayload> for SearchHit {
    fn from(p: PointPayload) -> Self {
        Self {
            url: p.url,
            title: p.title,
            company: p.company,
            source_type: p.source_type,
            text: p.text,
        }
    }
}

// ---------------------------------------------------------------------------
// VectorStore
// ---------------------------------------------------------------------------

/// Hybrid index over one Qdrant collection.
pub struct VectorStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    config: IndexConfig,
    ready: OnceCell<()>,
}

impl VectorStore {
    pub fn new(settings: &BackendSettings, config: &IndexConfig, dimension: usize) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = settings.qdrant_api_key.as_deref() {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|_| CompanyIntelError::config("invalid Qdrant API key"))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| CompanyIntelError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.qdrant_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dimension,
            config: config.clone(),
            ready: OnceCell::new(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection and its payload indexes if missing. Runs its
    /// checks once per store; later calls return immediately.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.bootstrap())
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(collection = %self.collection))]
    async fn bootstrap(&self) -> Result<()> {
        let exists: ExistsResult = self
            .call(Method::GET, &format!("/collections/{}/exists", self.collection), None)
            .await?;
        if exists.exists {
            debug!("collection already exists");
            return Ok(());
        }

        let body = json!({
            "vectors": { DENSE_VECTOR: { "size": self.dimension, "distance": "Cosine" } },
            "sparse_vectors": { SPARSE_VECTOR: { "modifier": "idf" } },
        });
        let _: Value = self
            .call(Method::PUT, &format!("/collections/{}", self.collection), Some(body))
            .await?;

        for field in INDEXED_FIELDS {
            let body = json!({ "field_name": field, "field_schema": "keyword" });
            let _: Value = self
                .call(
                    Method::PUT,
                    &format!("/collections/{}/index", self.collection),
                    Some(body),
                )
                .await?;
        }

        info!(dimension = self.dimension, "created collection");
        Ok(())
    }

    /// Upsert one point per chunk in batches. Returns the number stored.
    #[instrument(skip_all, fields(collection = %self.collection, chunks = chunks.len()))]
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        dense: &[Vec<f32>],
        sparse: &[SparseVector],
    ) -> Result<usize> {
        if chunks.len() != dense.len() || chunks.len() != sparse.len() {
            return Err(CompanyIntelError::validation(format!(
                "upsert length mismatch: {} chunks, {} dense, {} sparse",
                chunks.len(),
                dense.len(),
                sparse.len()
            )));
        }

        let points: Vec<Value> = chunks
            .iter()
            .zip(dense)
            .zip(sparse)
            .map(|((chunk, d), s)| point_json(chunk, d, s))
            .collect();

        let path = format!("/collections/{}/points?wait=true", self.collection);
        let mut stored = 0;
        for batch in points.chunks(self.config.upsert_batch_size.max(1)) {
            let _: Value = self
                .call(Method::PUT, &path, Some(json!({ "points": batch })))
                .await?;
            stored += batch.len();
            debug!(stored, "upserted batch");
        }

        info!(stored, "upserted points");
        Ok(stored)
    }

    /// Hybrid search: dense and sparse prefetches fused with reciprocal rank
    /// fusion, optionally filtered to one company.
    #[instrument(skip_all, fields(collection = %self.collection, company = company.unwrap_or(""), limit = limit))]
    pub async fn search(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        company: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let filter = company
            .map(normalize_company)
            .filter(|c| !c.is_empty())
            .map(|c| company_filter(&c));

        let mut prefetch = vec![json!({
            "query": dense,
            "using": DENSE_VECTOR,
            "score_threshold": self.config.dense_score_threshold,
            "limit": self.config.dense_limit,
        })];
        if !sparse.is_empty() {
            prefetch.push(json!({
                "query": { "indices": sparse.indices, "values": sparse.values },
                "using": SPARSE_VECTOR,
                "limit": self.config.sparse_limit,
            }));
        }
        if let Some(f) = &filter {
            for p in &mut prefetch {
                p["filter"] = f.clone();
            }
        }

        let mut body = json!({
            "prefetch": prefetch,
            "query": { "fusion": "rrf" },
            "limit": limit,
            "with_payload": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }

        let result: QueryResult = self
            .call(
                Method::POST,
                &format!("/collections/{}/points/query", self.collection),
                Some(body),
            )
            .await?;

        let hits: Vec<SearchHit> = result
            .points
            .into_iter()
            .map(|p| p.payload.unwrap_or_default().into())
            .collect();

        info!(hits = hits.len(), "hybrid search complete");
        Ok(hits)
    }

    /// Exact number of points for a company.
    pub async fn count(&self, company: &str) -> Result<u64> {
        let body = json!({ "filter": company_filter(company), "exact": true });
        let result: CountResult = self
            .call(
                Method::POST,
                &format!("/collections/{}/points/count", self.collection),
                Some(body),
            )
            .await?;
        Ok(result.count)
    }

    /// Delete every point for a company and return how many there were.
    /// Nothing is sent when the company has no points.
    #[instrument(skip_all, fields(collection = %self.collection, company = %company))]
    pub async fn delete_company(&self, company: &str) -> Result<u64> {
        let count = self.count(company).await?;
        if count == 0 {
            debug!("no points to delete");
            return Ok(0);
        }

        let body = json!({ "filter": company_filter(company) });
        let _: Value = self
            .call(
                Method::POST,
                &format!("/collections/{}/points/delete?wait=true", self.collection),
                Some(body),
            )
            .await?;

        info!(deleted = count, "deleted company points");
        Ok(count)
    }

    /// Send a request and unwrap Qdrant's `{"result": ...}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompanyIntelError::Index(format!("{method} {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompanyIntelError::Index(format!(
                "{method} {path} returned {status}: {detail}"
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CompanyIntelError::Index(format!("{method} {path}: bad response: {e}")))?;
        Ok(envelope.result)
    }
}

fn company_filter(company: &str) -> Value {
    json!({ "must": [{ "key": "company", "match": { "value": company } }] })
}

fn point_json(chunk: &Chunk, dense: &[f32], sparse: &SparseVector) -> Value {
    let meta = &chunk.metadata;
    let payload = PointPayload {
        text: chunk.text.clone(),
        url: meta.url.clone(),
        title: meta.title.clone(),
        company: meta.company.clone(),
        source_type: meta.source_type.to_string(),
        chunk_index: meta.chunk_index,
        scraped_at: meta.scraped_at.to_rfc3339(),
    };
    json!({
        "id": chunk.id.to_string(),
        "vector": {
            DENSE_VECTOR: dense,
            SPARSE_VECTOR: { "indices": sparse.indices, "values": sparse.values },
        },
        "payload": payload,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use companyintel_shared::{ChunkMetadata, SourceType};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(uri: &str, api_key: Option<&str>) -> BackendSettings {
        BackendSettings {
            llm_endpoint: "http://llm.invalid".into(),
            llm_model: "llm".into(),
            embed_endpoint: "http://embed.invalid".into(),
            embed_model: "embed".into(),
            qdrant_url: uri.to_string(),
            qdrant_api_key: api_key.map(String::from),
            data_dir: PathBuf::from("artifacts/data"),
        }
    }

    fn store(server: &MockServer) -> VectorStore {
        let config = IndexConfig {
            upsert_batch_size: 2,
            ..IndexConfig::default()
        };
        VectorStore::new(&settings(&server.uri(), None), &config, 3).unwrap()
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "result": result, "status": "ok", "time": 0.001 }))
    }

    fn chunk(i: usize) -> Chunk {
        Chunk {
            id: Uuid::now_v7(),
            text: format!("chunk {i}"),
            metadata: ChunkMetadata {
                url: "https://acme.com".into(),
                title: "Acme".into(),
                company: "acme".into(),
                source_type: SourceType::Website,
                chunk_index: i,
                scraped_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn ensure_collection_creates_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/company_intel/exists"))
            .respond_with(ok(json!({ "exists": false })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/company_intel"))
            .and(body_partial_json(json!({
                "vectors": { "dense": { "size": 3, "distance": "Cosine" } },
                "sparse_vectors": { "sparse": { "modifier": "idf" } },
            })))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/company_intel/index"))
            .respond_with(ok(json!({ "operation_id": 1, "status": "completed" })))
            .expect(2)
            .mount(&server)
            .await;

        let store = store(&server);
        store.ensure_collection().await.unwrap();
        store.ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_collection_skips_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/company_intel/exists"))
            .respond_with(ok(json!({ "exists": true })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ok(json!(true)))
            .expect(0)
            .mount(&server)
            .await;

        store(&server).ensure_collection().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_batches_points() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/company_intel/points"))
            .and(query_param("wait", "true"))
            .respond_with(ok(json!({ "operation_id": 7, "status": "completed" })))
            .expect(2)
            .mount(&server)
            .await;

        let chunks = vec![chunk(0), chunk(1), chunk(2)];
        let dense = vec![vec![1.0, 0.0, 0.0]; 3];
        let sparse = vec![
            SparseVector {
                indices: vec![1, 5],
                values: vec![0.5, 0.7],
            };
            3
        ];
        let stored = store(&server).upsert(&chunks, &dense, &sparse).await.unwrap();
        assert_eq!(stored, 3);
    }

    #[tokio::test]
    async fn upsert_rejects_misaligned_inputs() {
        let server = MockServer::start().await;
        let err = store(&server)
            .upsert(&[chunk(0)], &[], &[SparseVector::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, CompanyIntelError::Validation { .. }));
    }

    #[tokio::test]
    async fn search_uses_rrf_and_normalized_company_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/query"))
            .and(body_partial_json(json!({
                "query": { "fusion": "rrf" },
                "limit": 10,
                "with_payload": true,
                "filter": { "must": [{ "key": "company", "match": { "value": "acme" } }] },
            })))
            .respond_with(ok(json!({ "points": [
                { "id": "a", "score": 0.9, "payload": {
                    "text": "Acme makes anvils.", "url": "https://acme.com/about",
                    "title": "About", "company": "acme", "source_type": "website",
                    "chunk_index": 0, "scraped_at": "2025-01-01T00:00:00Z" } },
                { "id": "b", "score": 0.5, "payload": { "text": "Partial" } }
            ] })))
            .expect(1)
            .mount(&server)
            .await;

        let sparse = SparseVector {
            indices: vec![3],
            values: vec![1.0],
        };
        let hits = store(&server)
            .search(&[0.1, 0.2, 0.3], &sparse, Some("  ACME "), 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://acme.com/about");
        assert_eq!(hits[0].source_type, "website");
        assert_eq!(hits[1].text, "Partial");
        assert_eq!(hits[1].url, "");
    }

    #[tokio::test]
    async fn search_sends_both_prefetches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/query"))
            .and(body_partial_json(json!({
                "prefetch": [
                    { "using": "dense", "score_threshold": 0.3, "limit": 20 },
                    { "using": "sparse", "limit": 20, "query": { "indices": [3], "values": [1.0] } }
                ]
            })))
            .respond_with(ok(json!({ "points": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let sparse = SparseVector {
            indices: vec![3],
            values: vec![1.0],
        };
        let hits = store(&server)
            .search(&[0.1, 0.2, 0.3], &sparse, None, 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_company_skips_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/count"))
            .and(body_partial_json(json!({ "exact": true })))
            .respond_with(ok(json!({ "count": 0 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/delete"))
            .respond_with(ok(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        assert_eq!(store(&server).delete_company("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_company_returns_pre_delete_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/count"))
            .respond_with(ok(json!({ "count": 42 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/delete"))
            .and(body_partial_json(json!({
                "filter": { "must": [{ "key": "company", "match": { "value": "acme" } }] }
            })))
            .respond_with(ok(json!({ "operation_id": 9, "status": "completed" })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(store(&server).delete_company("acme").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn sends_api_key_and_surfaces_errors() {
        let server = MockServer::start().await;
        Mock::given(header("api-key", "secret"))
            .and(path("/collections/company_intel/points/count"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let store = VectorStore::new(
            &settings(&server.uri(), Some("secret")),
            &IndexConfig::default(),
            3,
        )
        .unwrap();
        let err = store.count("acme").await.unwrap_err();
        assert!(matches!(err, CompanyIntelError::Index(_)));
        assert!(err.to_string().contains("403"));
    }
}
