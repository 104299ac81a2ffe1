use crate::traits::{ChunkGraph, DocumentGraph};
use crate::{
    ChunkDocument, ChunkEmbedding, ChunkTopic, GraphError, SimilarityEdge, TopicEdge,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "neo4j";

/// Neo4j over the HTTP transactional API.
///
/// Each statement is sent to `/db/{database}/tx/commit`, so it runs in its
/// own auto-committed transaction.
pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> Result<Url, GraphError> {
        let base = Url::parse(&format!("{}/", self.endpoint.trim_end_matches('/')))?;
        Ok(base.join(&format!("db/{}/tx/commit", self.database))?)
    }

    /// Run one statement and return its result rows.
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>, GraphError> {
        let response = self
            .client
            .post(self.tx_url()?)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({
                "statements": [
                    {
                        "statement": statement,
                        "parameters": parameters
                    }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GraphError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(details) = first_error(&body) {
            return Err(GraphError::BackendResponse {
                backend: BACKEND.to_string(),
                details,
            });
        }

        Ok(extract_rows(&body))
    }
}

#[async_trait]
impl ChunkGraph for Neo4jStore {
    async fn fetch_chunk_embeddings(&self) -> Result<Vec<ChunkEmbedding>, GraphError> {
        let query = r#"
            MATCH (c:Chunk)
            WHERE c.embedding IS NOT NULL AND size(c.embedding) > 0
            RETURN c.chunk_id AS chunk_id, c.embedding AS embedding;
        "#;

        let rows = self.run(query, json!({})).await?;
        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id = row.first().and_then(Value::as_str);
            let embedding = row.get(1).and_then(Value::as_array);
            let (Some(chunk_id), Some(embedding)) = (chunk_id, embedding) else {
                warn!(?row, "skipping chunk row without id or embedding");
                continue;
            };

            let embedding = embedding
                .iter()
                .map(|value| {
                    value.as_f64().map(|number| number as f32).ok_or_else(|| {
                        GraphError::BackendResponse {
                            backend: BACKEND.to_string(),
                            details: format!("non-numeric embedding value on chunk {chunk_id}"),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            chunks.push(ChunkEmbedding::new(chunk_id, embedding));
        }

        Ok(chunks)
    }

    async fn merge_similarity_edge(&self, edge: &SimilarityEdge) -> Result<(), GraphError> {
        let cypher = r#"
            MATCH (c1:Chunk {chunk_id: $source_id}),
                  (c2:Chunk {chunk_id: $target_id})
            MERGE (c1)-[r:EMBEDDING_SIM]->(c2)
            ON CREATE SET r.embedding_similarity = $similarity;
        "#;

        debug!(
            source = %edge.source_id,
            target = %edge.target_id,
            similarity = edge.similarity,
            "merging EMBEDDING_SIM edge"
        );
        self.run(
            cypher,
            json!({
                "source_id": edge.source_id,
                "target_id": edge.target_id,
                "similarity": edge.similarity,
            }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_chunk_topics(&self) -> Result<Vec<ChunkTopic>, GraphError> {
        let query = r#"
            MATCH (c:Chunk)
            WHERE c.topic_id IS NOT NULL
            RETURN c.chunk_id AS chunk_id, c.topic_id AS topic_id;
        "#;

        let rows = self.run(query, json!({})).await?;
        Ok(rows.iter().filter_map(|row| topic_row(row)).collect())
    }

    async fn merge_topic_edge(&self, edge: &TopicEdge) -> Result<(), GraphError> {
        let cypher = r#"
            MATCH (c1:Chunk {chunk_id: $source_id}),
                  (c2:Chunk {chunk_id: $target_id})
            MERGE (c1)-[r:TOPIC_SIM]->(c2)
            ON CREATE SET r.topic_similarity = 1;
        "#;

        self.run(
            cypher,
            json!({
                "source_id": edge.source_id,
                "target_id": edge.target_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_chunks_by_topic(
        &self,
        topic_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkTopic>, GraphError> {
        // Topic ids may be stored as numbers; compare on their string form.
        let query = r#"
            MATCH (c:Chunk)
            WHERE toString(c.topic_id) = $topic_id
            RETURN c.chunk_id AS chunk_id, c.topic_id AS topic_id
            LIMIT $limit;
        "#;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .run(query, json!({ "topic_id": topic_id, "limit": limit }))
            .await?;
        Ok(rows.iter().filter_map(|row| topic_row(row)).collect())
    }
}

#[async_trait]
impl DocumentGraph for Neo4jStore {
    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        self.run(
            "CREATE CONSTRAINT IF NOT EXISTS FOR (d:Document) REQUIRE d.doc_id IS UNIQUE",
            json!({}),
        )
        .await?;
        self.run(
            "CREATE CONSTRAINT IF NOT EXISTS FOR (c:Chunk) REQUIRE c.chunk_id IS UNIQUE",
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), GraphError> {
        self.run("MATCH (n) DETACH DELETE n", json!({})).await?;
        Ok(())
    }

    async fn store_document(&self, document: &ChunkDocument) -> Result<usize, GraphError> {
        if document.file_name.is_empty() {
            return Ok(0);
        }

        let rows = document
            .chunks
            .iter()
            .filter(|chunk| !chunk.chunk_id.is_empty())
            .map(|chunk| -> Result<Value, GraphError> {
                Ok(json!({
                    "chunk_id": chunk.chunk_id,
                    "modality": chunk.modality.as_str(),
                    "content": chunk.content,
                    "embedding": chunk.embedding,
                    "textual_modality": chunk.textual_modality.clone().unwrap_or_default(),
                    "metadata": serde_json::to_string(&chunk.metadata)?,
                }))
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        let source = document.source.as_ref();
        let cypher = r#"
            MERGE (d:Document {doc_id: $doc_id})
            ON CREATE SET d.created_at = timestamp()
            SET d.source_path = coalesce($source_path, d.source_path),
                d.checksum = coalesce($checksum, d.checksum)
            WITH d
            UNWIND $rows AS row
            MERGE (ch:Chunk {chunk_id: row.chunk_id})
            ON CREATE SET ch.created_at = timestamp()
            SET ch.modality = row.modality,
                ch.content = row.content,
                ch.embedding = row.embedding,
                ch.textual_modality = row.textual_modality,
                ch.metadata = row.metadata
            MERGE (d)-[:HAS_CHUNK]->(ch)
            RETURN count(ch) AS chunk_count;
        "#;

        let stored = rows.len();
        self.run(
            cypher,
            json!({
                "doc_id": document.file_name,
                "source_path": source.map(|source| source.path.to_string_lossy().to_string()),
                "checksum": source.map(|source| source.checksum.clone()),
                "rows": rows,
            }),
        )
        .await?;

        Ok(stored)
    }
}

fn topic_row(row: &[Value]) -> Option<ChunkTopic> {
    let chunk_id = row.first().and_then(Value::as_str)?;
    let topic_id = match row.get(1)? {
        Value::String(topic) => topic.clone(),
        Value::Number(topic) => topic.to_string(),
        _ => return None,
    };
    Some(ChunkTopic {
        chunk_id: chunk_id.to_string(),
        topic_id,
    })
}

fn first_error(payload: &Value) -> Option<String> {
    let error = payload.pointer("/errors/0")?;
    let code = error.pointer("/code").and_then(Value::as_str).unwrap_or("unknown");
    let message = error.pointer("/message").and_then(Value::as_str).unwrap_or_default();
    Some(format!("{code}: {message}"))
}

fn extract_rows(payload: &Value) -> Vec<Vec<Value>> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|result| result.pointer("/data").and_then(Value::as_array))
        .flatten()
        .filter_map(|row_entry| {
            row_entry
                .pointer("/row")
                .or(Some(row_entry))
                .and_then(Value::as_array)
                .cloned()
        })
        .collect()
}
