//! OpenSearch k-NN retrieval and ingest.
//!
//! The HNSW index lives in OpenSearch; this module only builds the index
//! mapping, bulk-loads embedded documents and issues `knn` queries.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::OpenSearchSettings;
use crate::error::{Error, Result};
use crate::llm::ChatModel;

/// Field holding the document vector.
pub const EMBEDDING_FIELD: &str = "embedding";

const INGEST_BATCH: usize = 32;

/// A news article as stored in the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Similarity score; only set on search results.
    #[serde(default, skip_serializing)]
    pub score: Option<f32>,
}

impl Document {
    /// Text that gets embedded for this document.
    pub fn embedding_input(&self) -> String {
        if self.title.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n\n{}", self.title, self.text)
        }
    }
}

/// Nearest-neighbour document search.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<Document>>;
}

/// Client for one OpenSearch index.
#[derive(Debug, Clone)]
pub struct OpenSearchRetriever {
    settings: OpenSearchSettings,
    client: reqwest::Client,
}

impl OpenSearchRetriever {
    pub fn new(settings: OpenSearchSettings) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { settings, client })
    }

    pub fn index(&self) -> &str {
        &self.settings.index
    }

    /// Create the index with an HNSW `knn_vector` mapping unless it exists.
    /// Returns whether the index was created.
    pub async fn ensure_index(&self, dimension: usize) -> Result<bool> {
        let response = self.request(Method::HEAD, "").send().await.map_err(unreachable)?;
        match response.status() {
            s if s.is_success() => return Ok(false),
            StatusCode::NOT_FOUND => {}
            s => return Err(Error::Retrieval(format!("index check returned {s}"))),
        }

        info!("Creating index {} (dimension {})", self.settings.index, dimension);
        let response = self
            .request(Method::PUT, "")
            .json(&index_body(dimension))
            .send()
            .await
            .map_err(unreachable)?;
        checked(response).await?;
        Ok(true)
    }

    /// Bulk-load documents with their vectors and refresh the index.
    pub async fn index_documents(&self, documents: &[Document], vectors: &[Vec<f32>]) -> Result<usize> {
        if documents.len() != vectors.len() {
            return Err(Error::Retrieval(format!(
                "{} documents but {} vectors",
                documents.len(),
                vectors.len()
            )));
        }
        if documents.is_empty() {
            return Ok(0);
        }

        let body = bulk_body(&self.settings.index, documents, vectors)?;
        let response = self
            .request(Method::POST, "/_bulk?refresh=true")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(unreachable)?;
        let result = checked(response).await?;

        if result.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let reason = result
                .pointer("/items/0/index/error/reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::Retrieval(format!("bulk ingest failed: {reason}")));
        }
        Ok(documents.len())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}{}", self.settings.url, self.settings.index, path);
        let builder = self.client.request(method, url);
        match &self.settings.basic_auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }
}

#[async_trait]
impl Retriever for OpenSearchRetriever {
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<Document>> {
        debug!("k-NN search on {} (k={})", self.settings.index, k);
        let response = self
            .request(Method::POST, "/_search")
            .json(&knn_query(query_vector, k))
            .send()
            .await
            .map_err(unreachable)?;
        parse_hits(&checked(response).await?)
    }
}

fn unreachable(e: reqwest::Error) -> Error {
    Error::Retrieval(format!("OpenSearch unreachable: {e}"))
}

async fn checked(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.map_err(unreachable)?;
    if !status.is_success() {
        return Err(Error::Retrieval(format!("OpenSearch returned {status}: {text}")));
    }
    serde_json::from_str(&text).map_err(|e| Error::Retrieval(format!("invalid OpenSearch response: {e}")))
}

fn index_body(dimension: usize) -> Value {
    json!({
        "settings": {"index": {"knn": true}},
        "mappings": {
            "properties": {
                "title": {"type": "text"},
                "text": {"type": "text"},
                "source": {"type": "keyword"},
                "published_at": {"type": "date"},
                EMBEDDING_FIELD: {
                    "type": "knn_vector",
                    "dimension": dimension,
                    "method": {
                        "name": "hnsw",
                        "space_type": "cosinesimil",
                        "engine": "lucene"
                    }
                }
            }
        }
    })
}

fn knn_query(vector: &[f32], k: usize) -> Value {
    json!({
        "size": k,
        "_source": {"excludes": [EMBEDDING_FIELD]},
        "query": {"knn": {EMBEDDING_FIELD: {"vector": vector, "k": k}}}
    })
}

fn bulk_body(index: &str, documents: &[Document], vectors: &[Vec<f32>]) -> Result<String> {
    let mut body = String::new();
    for (doc, vector) in documents.iter().zip(vectors) {
        let action = json!({"index": {"_index": index, "_id": doc.id}});
        let mut source = serde_json::to_value(doc)?;
        source[EMBEDDING_FIELD] = json!(vector);
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source.to_string());
        body.push('\n');
    }
    Ok(body)
}

fn parse_hits(result: &Value) -> Result<Vec<Document>> {
    let hits = result
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Retrieval("search response has no hits".into()))?;

    hits.iter()
        .map(|hit| -> Result<Document> {
            let mut doc: Document = serde_json::from_value(hit["_source"].clone())?;
            if let Some(id) = hit["_id"].as_str() {
                doc.id = id.to_string();
            }
            doc.score = hit["_score"].as_f64().map(|s| s as f32);
            Ok(doc)
        })
        .collect()
}

/// Load a JSONL file of documents, embed and index them. Returns the count.
pub async fn ingest_file(
    path: &Path,
    model: &dyn ChatModel,
    retriever: &OpenSearchRetriever,
    dimension: usize,
) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;
    let documents = parse_jsonl(&raw)?;
    info!("Ingesting {} documents from {}", documents.len(), path.display());

    retriever.ensure_index(dimension).await?;

    let mut indexed = 0;
    for batch in documents.chunks(INGEST_BATCH) {
        let inputs: Vec<String> = batch.iter().map(Document::embedding_input).collect();
        let vectors = model.embed(&inputs).await?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(Error::Retrieval(format!(
                "embedding has dimension {}, index expects {dimension}",
                bad.len()
            )));
        }
        indexed += retriever.index_documents(batch, &vectors).await?;
        debug!("Indexed {}/{}", indexed, documents.len());
    }
    Ok(indexed)
}

/// One document per non-empty line; missing ids get a fresh uuid.
fn parse_jsonl(raw: &str) -> Result<Vec<Document>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| -> Result<Document> {
            let mut doc: Document = serde_json::from_str(line)
                .map_err(|e| Error::InvalidParams(format!("line {}: {e}", n + 1)))?;
            if doc.id.is_empty() {
                doc.id = Uuid::new_v4().to_string();
            }
            Ok(doc)
        })
        .collect()
}
