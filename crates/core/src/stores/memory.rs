//! In-process graph with the same merge semantics as the Neo4j adapter.

use crate::traits::{ChunkGraph, DocumentGraph};
use crate::{
    ChunkDocument, ChunkEmbedding, ChunkTopic, GraphError, SimilarityEdge, TopicEdge,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryChunk {
    chunk_id: String,
    document_id: Option<String>,
    embedding: Vec<f32>,
    topic_id: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    chunks: Vec<MemoryChunk>,
    documents: Vec<String>,
    similarity_edges: BTreeMap<(String, String), f64>,
    topic_edges: BTreeSet<(String, String)>,
    edge_writes: usize,
}

impl MemoryState {
    fn position(&self, chunk_id: &str) -> Option<usize> {
        self.chunks.iter().position(|chunk| chunk.chunk_id == chunk_id)
    }

    fn both_exist(&self, source_id: &str, target_id: &str) -> bool {
        self.position(source_id).is_some() && self.position(target_id).is_some()
    }

    fn upsert_chunk(&mut self, chunk: MemoryChunk) {
        match self.position(&chunk.chunk_id) {
            Some(index) => {
                let existing = &mut self.chunks[index];
                existing.embedding = chunk.embedding;
                if chunk.document_id.is_some() {
                    existing.document_id = chunk.document_id;
                }
                if chunk.topic_id.is_some() {
                    existing.topic_id = chunk.topic_id;
                }
            }
            None => self.chunks.push(chunk),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<MemoryState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the graph with chunks in the given order.
    pub fn with_embeddings<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let graph = Self::new();
        for (chunk_id, embedding) in chunks {
            graph.insert_chunk(chunk_id, embedding);
        }
        graph
    }

    pub fn insert_chunk(&self, chunk_id: impl Into<String>, embedding: Vec<f32>) {
        self.lock().upsert_chunk(MemoryChunk {
            chunk_id: chunk_id.into(),
            embedding,
            ..MemoryChunk::default()
        });
    }

    pub fn set_topic(&self, chunk_id: &str, topic_id: impl Into<String>) {
        let mut state = self.lock();
        if let Some(index) = state.position(chunk_id) {
            state.chunks[index].topic_id = Some(topic_id.into());
        }
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.lock()
            .chunks
            .iter()
            .map(|chunk| chunk.chunk_id.clone())
            .collect()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.lock().documents.clone()
    }

    pub fn chunk_document(&self, chunk_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .position(chunk_id)
            .and_then(|index| state.chunks[index].document_id.clone())
    }

    pub fn similarity_edges(&self) -> Vec<SimilarityEdge> {
        self.lock()
            .similarity_edges
            .iter()
            .map(|((source_id, target_id), similarity)| SimilarityEdge {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                similarity: *similarity,
            })
            .collect()
    }

    pub fn similarity_edge(&self, source_id: &str, target_id: &str) -> Option<f64> {
        self.lock()
            .similarity_edges
            .get(&(source_id.to_string(), target_id.to_string()))
            .copied()
    }

    pub fn topic_edges(&self) -> Vec<TopicEdge> {
        self.lock()
            .topic_edges
            .iter()
            .map(|(source_id, target_id)| TopicEdge {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
            })
            .collect()
    }

    /// Number of edge merge requests received, including no-ops.
    pub fn edge_writes(&self) -> usize {
        self.lock().edge_writes
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChunkGraph for MemoryGraph {
    async fn fetch_chunk_embeddings(&self) -> Result<Vec<ChunkEmbedding>, GraphError> {
        Ok(self
            .lock()
            .chunks
            .iter()
            .filter(|chunk| !chunk.embedding.is_empty())
            .map(|chunk| ChunkEmbedding::new(chunk.chunk_id.clone(), chunk.embedding.clone()))
            .collect())
    }

    async fn merge_similarity_edge(&self, edge: &SimilarityEdge) -> Result<(), GraphError> {
        let mut state = self.lock();
        state.edge_writes += 1;
        if state.both_exist(&edge.source_id, &edge.target_id) {
            state
                .similarity_edges
                .entry((edge.source_id.clone(), edge.target_id.clone()))
                .or_insert(edge.similarity);
        }
        Ok(())
    }

    async fn fetch_chunk_topics(&self) -> Result<Vec<ChunkTopic>, GraphError> {
        Ok(self
            .lock()
            .chunks
            .iter()
            .filter_map(|chunk| {
                chunk.topic_id.as_ref().map(|topic_id| ChunkTopic {
                    chunk_id: chunk.chunk_id.clone(),
                    topic_id: topic_id.clone(),
                })
            })
            .collect())
    }

    async fn merge_topic_edge(&self, edge: &TopicEdge) -> Result<(), GraphError> {
        let mut state = self.lock();
        state.edge_writes += 1;
        if state.both_exist(&edge.source_id, &edge.target_id) {
            state
                .topic_edges
                .insert((edge.source_id.clone(), edge.target_id.clone()));
        }
        Ok(())
    }

    async fn fetch_chunks_by_topic(
        &self,
        topic_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkTopic>, GraphError> {
        Ok(self
            .lock()
            .chunks
            .iter()
            .filter(|chunk| chunk.topic_id.as_deref() == Some(topic_id))
            .take(limit)
            .map(|chunk| ChunkTopic {
                chunk_id: chunk.chunk_id.clone(),
                topic_id: topic_id.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl DocumentGraph for MemoryGraph {
    async fn ensure_constraints(&self) -> Result<(), GraphError> {
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), GraphError> {
        *self.lock() = MemoryState::default();
        Ok(())
    }

    async fn store_document(&self, document: &ChunkDocument) -> Result<usize, GraphError> {
        if document.file_name.is_empty() {
            return Ok(0);
        }

        let mut state = self.lock();
        if !state.documents.contains(&document.file_name) {
            state.documents.push(document.file_name.clone());
        }

        let mut stored = 0;
        for chunk in document.chunks.iter().filter(|chunk| !chunk.chunk_id.is_empty()) {
            state.upsert_chunk(MemoryChunk {
                chunk_id: chunk.chunk_id.clone(),
                document_id: Some(document.file_name.clone()),
                embedding: chunk.embedding.clone(),
                topic_id: None,
            });
            stored += 1;
        }

        Ok(stored)
    }
}
