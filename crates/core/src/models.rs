use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Where a [`ChunkDocument`] was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSource {
    pub path: PathBuf,
    pub checksum: String,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    Table,
    Image,
    #[serde(other)]
    Other,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Table => "table",
            Modality::Image => "image",
            Modality::Other => "other",
        }
    }
}

/// One unit of ingested content as produced by the parsing and embedding stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default = "empty_metadata")]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textual_modality: Option<String>,
}

impl Default for ChunkRecord {
    fn default() -> Self {
        Self {
            chunk_id: String::new(),
            modality: Modality::default(),
            content: String::new(),
            embedding: Vec::new(),
            metadata: empty_metadata(),
            textual_modality: None,
        }
    }
}

fn empty_metadata() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkDocument {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
    #[serde(skip)]
    pub source: Option<ManifestSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkManifest {
    #[serde(default)]
    pub files: Vec<ChunkDocument>,
}

impl ChunkManifest {
    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|file| file.chunks.len()).sum()
    }
}

/// A chunk as read back from the graph for similarity work.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
}

impl ChunkEmbedding {
    pub fn new(chunk_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            embedding,
        }
    }
}

/// A directed `EMBEDDING_SIM` relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityEdge {
    pub source_id: String,
    pub target_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTopic {
    pub chunk_id: String,
    pub topic_id: String,
}

/// A directed `TOPIC_SIM` relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEdge {
    pub source_id: String,
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub similarity: f64,
}

/// A chunk ranked by the blend of query similarity and topic membership.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridHit {
    pub chunk_id: String,
    pub topic_id: Option<String>,
    /// Cosine similarity to the query; 0.0 for chunks reached only through a topic.
    pub similarity: f64,
    pub topic_relevant: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreReport {
    pub documents: usize,
    pub chunks: usize,
}
