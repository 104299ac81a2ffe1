use crate::{
    ChunkDocument, ChunkEmbedding, ChunkTopic, GraphError, SimilarityEdge, TopicEdge,
};
use async_trait::async_trait;

/// Read chunk vectors and write chunk-to-chunk relationships.
///
/// Edge writes are create-or-no-op: an existing edge between the same ordered
/// pair is left untouched, its properties included.
#[async_trait]
pub trait ChunkGraph: Send + Sync {
    /// All chunk nodes with a present, non-empty embedding, in store order.
    async fn fetch_chunk_embeddings(&self) -> Result<Vec<ChunkEmbedding>, GraphError>;

    async fn merge_similarity_edge(&self, edge: &SimilarityEdge) -> Result<(), GraphError>;

    /// All chunk nodes carrying a topic id, in store order.
    async fn fetch_chunk_topics(&self) -> Result<Vec<ChunkTopic>, GraphError>;

    async fn merge_topic_edge(&self, edge: &TopicEdge) -> Result<(), GraphError>;

    /// Up to `limit` chunks whose topic id equals `topic_id`, in store order.
    async fn fetch_chunks_by_topic(
        &self,
        topic_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkTopic>, GraphError>;
}

#[async_trait]
pub trait DocumentGraph: Send + Sync {
    async fn ensure_constraints(&self) -> Result<(), GraphError>;

    async fn clear_all(&self) -> Result<(), GraphError>;

    /// Merge the document, its chunks and the `HAS_CHUNK` links. Returns the
    /// number of chunks written.
    async fn store_document(&self, document: &ChunkDocument) -> Result<usize, GraphError>;
}
