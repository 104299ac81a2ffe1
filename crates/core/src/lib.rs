pub mod embeddings;
pub mod error;
pub mod manifest;
pub mod models;
pub mod relationships;
pub mod retrieval;
pub mod similarity;
pub mod storage;
pub mod stores;
pub mod topics;
pub mod traits;

pub use embeddings::{embed_missing, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{GraphError, IngestError};
pub use manifest::{
    discover_manifest_files, load_manifest, load_manifests_best_effort, manifest_dimensions,
    ManifestReport, SkippedManifest,
};
pub use models::{
    ChunkDocument, ChunkEmbedding, ChunkManifest, ChunkRecord, ChunkTopic, HybridHit,
    ManifestSource, Modality, RankedChunk, SimilarityEdge, StoreReport, TopicEdge,
};
pub use relationships::{
    build_threshold_similarity, build_topk_similarity, plan_threshold_edges, plan_topk_edges,
    EdgePolicy, SimilarityGraphBuilder, DEFAULT_THRESHOLD, DEFAULT_TOP_K,
};
pub use retrieval::{
    hybrid_retrieve, nearest_chunks, topic_ids_from_ranked, HybridOptions,
    DEFAULT_MAX_PER_TOPIC, DEFAULT_TOPIC_CANDIDATES, DEFAULT_TOPIC_WEIGHT,
};
pub use similarity::cosine_similarity;
pub use storage::store_manifest;
pub use stores::{MemoryGraph, Neo4jStore};
pub use topics::{build_topic_similarity, TopicLinkMode};
pub use traits::{ChunkGraph, DocumentGraph};
