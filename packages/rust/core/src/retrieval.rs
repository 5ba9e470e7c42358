//! Retrieval tool: hybrid search trimmed to a token budget.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use companyintel_chunker::Tokenizer;
use companyintel_index::{Embedder, VectorStore};
use companyintel_shared::{Result, RetrievalConfig, SearchHit, normalize_company};

/// Shown when a search returns nothing.
pub const NO_RESULTS: &str = "No results found in the knowledge base.";

/// One passage handed to the conversational surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub url: String,
    pub title: String,
    pub text: String,
}

impl From<SearchHit> for Passage {
    fn from(hit: SearchHit) -> Self {
        Self {
            url: hit.url,
            title: hit.title,
            text: hit.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "passages", rename_all = "snake_case")]
pub enum SearchOutcome {
    Passages(Vec<Passage>),
    NoResults,
}

impl fmt::Display for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResults => f.write_str(NO_RESULTS),
            Self::Passages(passages) => {
                for (i, p) in passages.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n\n")?;
                    }
                    write!(f, "[{}] {}\n{}\n{}", i + 1, p.title, p.url, p.text)?;
                }
                Ok(())
            }
        }
    }
}

/// Longest prefix of `results` whose texts fit in `budget` tokens. Stops at
/// the first result that would overflow, even if a later one would fit.
pub fn apply_budget(results: Vec<SearchHit>, budget: usize, tokenizer: &Tokenizer) -> Vec<SearchHit> {
    let mut used = 0;
    let mut kept = Vec::with_capacity(results.len());
    for hit in results {
        let tokens = tokenizer.count(&hit.text);
        if used + tokens > budget {
            debug!(used, tokens, budget, "context budget reached");
            break;
        }
        used += tokens;
        kept.push(hit);
    }
    kept
}

pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<VectorStore>,
    tokenizer: Arc<Tokenizer>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<VectorStore>,
        tokenizer: Arc<Tokenizer>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            tokenizer,
            config,
        }
    }

    /// Embed the query as given, run the hybrid search (optionally limited
    /// to one company) and keep what fits in the context budget.
    #[instrument(skip_all, fields(company = company.unwrap_or("")))]
    pub async fn search_knowledge_base(&self, query: &str, company: Option<&str>) -> Result<SearchOutcome> {
        let company = company.map(normalize_company).filter(|c| !c.is_empty());

        self.index.ensure_collection().await?;
        let (dense, sparse) = self.embedder.embed_query(query).await?;
        let hits = self
            .index
            .search(&dense, &sparse, company.as_deref(), self.config.fusion_limit)
            .await?;
        let fused = hits.len();
        let kept = apply_budget(hits, self.config.context_budget_tokens, &self.tokenizer);

        info!(fused, kept = kept.len(), "knowledge base search");
        if kept.is_empty() {
            return Ok(SearchOutcome::NoResults);
        }
        Ok(SearchOutcome::Passages(kept.into_iter().map(Passage::from).collect()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use companyintel_shared::{BackendSettings, EmbeddingConfig, IndexConfig};

    use super::*;

    fn hit(text: &str) -> SearchHit {
        SearchHit {
            url: format!("https://acme.com/{}", text.len()),
            title: "Acme".into(),
            company: "acme".into(),
            source_type: "website".into(),
            text: text.into(),
        }
    }

    fn hits() -> Vec<SearchHit> {
        vec![
            hit("Acme builds anvils."),
            hit("Acme was founded in 1949 in Phoenix, Arizona, by Wile E. Coyote's supplier network."),
            hit("Skates."),
        ]
    }

    #[test]
    fn zero_budget_keeps_nothing() {
        let tokenizer = Tokenizer::new().unwrap();
        assert!(apply_budget(hits(), 0, &tokenizer).is_empty());
    }

    #[test]
    fn large_budget_keeps_everything() {
        let tokenizer = Tokenizer::new().unwrap();
        assert_eq!(apply_budget(hits(), 10_000, &tokenizer), hits());
    }

    #[test]
    fn stops_at_first_overflow() {
        let tokenizer = Tokenizer::new().unwrap();
        let first = tokenizer.count(&hits()[0].text);
        let third = tokenizer.count(&hits()[2].text);

        // Room for the first and third but not the second.
        let kept = apply_budget(hits(), first + third, &tokenizer);
        assert_eq!(kept, vec![hits()[0].clone()]);
    }

    #[test]
    fn kept_tokens_never_exceed_budget() {
        let tokenizer = Tokenizer::new().unwrap();
        for budget in [1, 5, 10, 20, 40] {
            let used: usize = apply_budget(hits(), budget, &tokenizer)
                .iter()
                .map(|h| tokenizer.count(&h.text))
                .sum();
            assert!(used <= budget);
        }
    }

    #[test]
    fn no_results_display() {
        assert_eq!(SearchOutcome::NoResults.to_string(), NO_RESULTS);
    }

    fn retriever(server: &MockServer) -> Retriever {
        let settings = BackendSettings {
            llm_endpoint: "http://llm.invalid".into(),
            llm_model: "llm".into(),
            embed_endpoint: server.uri(),
            embed_model: "nomic-embed-text".into(),
            qdrant_url: server.uri(),
            qdrant_api_key: None,
            data_dir: PathBuf::from("unused"),
        };
        let embedding = EmbeddingConfig {
            dimension: 2,
            ..EmbeddingConfig::default()
        };
        Retriever::new(
            Arc::new(Embedder::new(&settings, &embedding).unwrap()),
            Arc::new(VectorStore::new(&settings, &IndexConfig::default(), 2).unwrap()),
            Arc::new(Tokenizer::new().unwrap()),
            RetrievalConfig::default(),
        )
    }

    async fn mount_backend(server: &MockServer, points: serde_json::Value) {
        Mock::given(path("/collections/company_intel/exists"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "exists": true } })),
            )
            .mount(server)
            .await;
        Mock::given(path("/api/embed"))
            .and(body_partial_json(json!({ "input": ["Who founded  Acme?"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0, 0.0]] })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/company_intel/points/query"))
            .and(body_partial_json(json!({
                "limit": 10,
                "filter": { "must": [{ "key": "company", "match": { "value": "acme" } }] }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "result": { "points": points } })),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn returns_passages_for_company() {
        let server = MockServer::start().await;
        mount_backend(
            &server,
            json!([{
                "id": "0190a0c4-0000-7000-8000-000000000000",
                "score": 0.5,
                "payload": {
                    "text": "Acme was founded by Ada.",
                    "url": "https://acme.com/about",
                    "title": "About",
                    "company": "acme",
                    "source_type": "website"
                }
            }]),
        )
        .await;

        let outcome = retriever(&server)
            .search_knowledge_base("Who founded  Acme?", Some(" ACME "))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SearchOutcome::Passages(vec![Passage {
                url: "https://acme.com/about".into(),
                title: "About".into(),
                text: "Acme was founded by Ada.".into(),
            }])
        );
    }

    #[tokio::test]
    async fn empty_search_is_no_results() {
        let server = MockServer::start().await;
        mount_backend(&server, json!([])).await;

        let outcome = retriever(&server)
            .search_knowledge_base("Who founded  Acme?", Some("acme"))
            .await
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NoResults);
        assert_eq!(outcome.to_string(), NO_RESULTS);
    }
}
