//! `EMBEDDING_SIM` relationships between chunk nodes.
//!
//! Both policies read every embedded chunk into memory and compare them
//! pairwise, O(N^2) in the number of chunks. Edges are planned first and then
//! written one merge at a time; a failed write stops the run and leaves the
//! edges already written in place.

use crate::similarity::{cosine_similarity, sort_descending};
use crate::traits::ChunkGraph;
use crate::{ChunkEmbedding, GraphError, SimilarityEdge};
use tracing::info;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgePolicy {
    /// Link each chunk to its `k` most similar chunks.
    TopK(usize),
    /// Link every unordered pair whose similarity is at least the threshold.
    Threshold(f64),
}

impl Default for EdgePolicy {
    fn default() -> Self {
        EdgePolicy::Threshold(DEFAULT_THRESHOLD)
    }
}

pub struct SimilarityGraphBuilder<G>
where
    G: ChunkGraph,
{
    graph: G,
}

impl<G> SimilarityGraphBuilder<G>
where
    G: ChunkGraph,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn into_inner(self) -> G {
        self.graph
    }

    pub async fn build(&self, policy: EdgePolicy) -> Result<usize, GraphError> {
        match policy {
            EdgePolicy::TopK(k) => self.build_topk(k).await,
            EdgePolicy::Threshold(threshold) => self.build_threshold(threshold).await,
        }
    }

    pub async fn build_topk(&self, k: usize) -> Result<usize, GraphError> {
        build_topk_similarity(&self.graph, k).await
    }

    pub async fn build_threshold(&self, threshold: f64) -> Result<usize, GraphError> {
        build_threshold_similarity(&self.graph, threshold).await
    }
}

/// Connect every embedded chunk to its `k` nearest chunks by cosine
/// similarity. Returns the number of edge merges issued.
///
/// The relation is directed: `a -> b` is written only when `b` ranks in the
/// top `k` of `a`.
pub async fn build_topk_similarity<G>(graph: &G, k: usize) -> Result<usize, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    info!(k, "building EMBEDDING_SIM edges with top-k policy");
    let chunks = graph.fetch_chunk_embeddings().await?;
    info!(chunk_count = chunks.len(), "retrieved chunks with embeddings");

    if chunks.len() < 2 {
        info!("not enough chunks to form relationships");
        return Ok(0);
    }

    let edges = plan_topk_edges(&chunks, k)?;
    let written = write_edges(graph, &edges).await?;
    info!(k, edges = written, "EMBEDDING_SIM top-k edges written");
    Ok(written)
}

/// Connect every unordered pair of embedded chunks whose cosine similarity is
/// at least `threshold`, once, from the earlier chunk to the later one.
/// Returns the number of edge merges issued.
pub async fn build_threshold_similarity<G>(graph: &G, threshold: f64) -> Result<usize, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    info!(threshold, "building EMBEDDING_SIM edges with threshold policy");
    let chunks = graph.fetch_chunk_embeddings().await?;
    info!(chunk_count = chunks.len(), "retrieved chunks with embeddings");

    if chunks.len() < 2 {
        info!("not enough chunks to form relationships");
        return Ok(0);
    }

    let edges = plan_threshold_edges(&chunks, threshold)?;
    let written = write_edges(graph, &edges).await?;
    info!(threshold, edges = written, "EMBEDDING_SIM threshold edges written");
    Ok(written)
}

/// Edges the top-k policy writes, grouped by source chunk in input order and
/// ranked by descending similarity within each group.
pub fn plan_topk_edges(chunks: &[ChunkEmbedding], k: usize) -> Result<Vec<SimilarityEdge>, GraphError> {
    let mut edges = Vec::with_capacity(chunks.len() * k.min(chunks.len().saturating_sub(1)));

    for (i, source) in chunks.iter().enumerate() {
        let mut candidates = Vec::with_capacity(chunks.len().saturating_sub(1));
        for (j, target) in chunks.iter().enumerate() {
            if i == j {
                continue;
            }
            let similarity = cosine_similarity(&source.embedding, &target.embedding)?;
            candidates.push((j, similarity));
        }

        sort_descending(&mut candidates);
        candidates.truncate(k);

        edges.extend(candidates.into_iter().map(|(j, similarity)| SimilarityEdge {
            source_id: source.chunk_id.clone(),
            target_id: chunks[j].chunk_id.clone(),
            similarity,
        }));
    }

    Ok(edges)
}

/// Edges the threshold policy writes, in `(i, j)` pair order with `i < j`.
pub fn plan_threshold_edges(
    chunks: &[ChunkEmbedding],
    threshold: f64,
) -> Result<Vec<SimilarityEdge>, GraphError> {
    let mut edges = Vec::new();

    for (i, source) in chunks.iter().enumerate() {
        for target in &chunks[i + 1..] {
            let similarity = cosine_similarity(&source.embedding, &target.embedding)?;
            if similarity >= threshold {
                edges.push(SimilarityEdge {
                    source_id: source.chunk_id.clone(),
                    target_id: target.chunk_id.clone(),
                    similarity,
                });
            }
        }
    }

    Ok(edges)
}

async fn write_edges<G>(graph: &G, edges: &[SimilarityEdge]) -> Result<usize, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    let mut written = 0;
    for edge in edges {
        graph.merge_similarity_edge(edge).await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryGraph;
    use crate::{ChunkTopic, TopicEdge};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn example_graph() -> MemoryGraph {
        MemoryGraph::with_embeddings([
            ("A", vec![1.0, 0.0]),
            ("B", vec![1.0, 0.0]),
            ("C", vec![0.0, 1.0]),
            ("D", vec![-1.0, 0.0]),
        ])
    }

    fn edge_pairs(graph: &MemoryGraph) -> Vec<(String, String)> {
        graph
            .similarity_edges()
            .into_iter()
            .map(|edge| (edge.source_id, edge.target_id))
            .collect()
    }

    fn pair(source: &str, target: &str) -> (String, String) {
        (source.to_string(), target.to_string())
    }

    fn spread_chunks() -> Vec<ChunkEmbedding> {
        vec![
            ChunkEmbedding::new("p", vec![1.0, 0.1, 0.0]),
            ChunkEmbedding::new("q", vec![0.9, 0.3, 0.1]),
            ChunkEmbedding::new("r", vec![0.0, 1.0, 0.2]),
            ChunkEmbedding::new("s", vec![-0.4, 0.2, 1.0]),
            ChunkEmbedding::new("t", vec![0.5, 0.5, 0.5]),
            ChunkEmbedding::new("u", vec![0.0, 0.0, 0.0]),
        ]
    }

    #[tokio::test]
    async fn threshold_links_only_identical_pair() {
        let graph = example_graph();
        let written = build_threshold_similarity(&graph, 0.99).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(edge_pairs(&graph), vec![pair("A", "B")]);
        assert_eq!(graph.similarity_edge("A", "B"), Some(1.0));
    }

    #[tokio::test]
    async fn topk_of_one_breaks_ties_by_encounter_order() {
        let graph = example_graph();
        let written = build_topk_similarity(&graph, 1).await.unwrap();

        assert_eq!(written, 4);
        let edges: HashSet<_> = edge_pairs(&graph).into_iter().collect();
        let expected: HashSet<_> = [pair("A", "B"), pair("B", "A"), pair("C", "A"), pair("D", "C")]
            .into_iter()
            .collect();
        assert_eq!(edges, expected);
    }

    #[test]
    fn topk_selects_min_of_k_and_remaining() {
        let chunks = spread_chunks();
        for k in [0, 1, 3, 5, 9] {
            let edges = plan_topk_edges(&chunks, k).unwrap();
            for chunk in &chunks {
                let outgoing = edges
                    .iter()
                    .filter(|edge| edge.source_id == chunk.chunk_id)
                    .count();
                assert_eq!(outgoing, k.min(chunks.len() - 1));
            }
        }
    }

    #[test]
    fn topk_never_skips_a_stronger_candidate() {
        let chunks = spread_chunks();
        let edges = plan_topk_edges(&chunks, 2).unwrap();

        for source in &chunks {
            let selected: Vec<_> = edges
                .iter()
                .filter(|edge| edge.source_id == source.chunk_id)
                .collect();
            let weakest = selected
                .iter()
                .map(|edge| edge.similarity)
                .fold(f64::INFINITY, f64::min);

            for target in chunks.iter().filter(|target| target.chunk_id != source.chunk_id) {
                if selected.iter().any(|edge| edge.target_id == target.chunk_id) {
                    continue;
                }
                let excluded = cosine_similarity(&source.embedding, &target.embedding).unwrap();
                assert!(excluded <= weakest);
            }

            let ordered = selected
                .windows(2)
                .all(|pair| pair[0].similarity >= pair[1].similarity);
            assert!(ordered);
        }
    }

    #[test]
    fn threshold_edges_are_single_direction_and_above_cutoff() {
        let chunks = spread_chunks();
        let threshold = 0.5;
        let edges = plan_threshold_edges(&chunks, threshold).unwrap();
        let position = |id: &str| chunks.iter().position(|chunk| chunk.chunk_id == id).unwrap();

        for edge in &edges {
            assert!(edge.similarity >= threshold);
            assert!(position(&edge.source_id) < position(&edge.target_id));
        }

        for (i, left) in chunks.iter().enumerate() {
            for right in &chunks[i + 1..] {
                let similarity = cosine_similarity(&left.embedding, &right.embedding).unwrap();
                let linked = edges
                    .iter()
                    .filter(|edge| edge.source_id == left.chunk_id && edge.target_id == right.chunk_id)
                    .count();
                assert_eq!(linked, usize::from(similarity >= threshold));
            }
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let chunks = vec![
            ChunkEmbedding::new("a", vec![1.0, 0.0]),
            ChunkEmbedding::new("b", vec![1.0, 0.0]),
        ];
        assert_eq!(plan_threshold_edges(&chunks, 1.0).unwrap().len(), 1);
    }

    #[test]
    fn extreme_thresholds_connect_all_or_nothing() {
        let chunks = spread_chunks();
        let n = chunks.len();
        assert_eq!(plan_threshold_edges(&chunks, -1.5).unwrap().len(), n * (n - 1) / 2);
        assert!(plan_threshold_edges(&chunks, 1.5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn fewer_than_two_chunks_is_a_no_op() {
        let empty = MemoryGraph::new();
        assert_eq!(build_topk_similarity(&empty, DEFAULT_TOP_K).await.unwrap(), 0);
        assert_eq!(build_threshold_similarity(&empty, DEFAULT_THRESHOLD).await.unwrap(), 0);

        let single = MemoryGraph::with_embeddings([("only", vec![1.0, 2.0])]);
        single.insert_chunk("bare", Vec::new());
        assert_eq!(build_topk_similarity(&single, 3).await.unwrap(), 0);
        assert_eq!(build_threshold_similarity(&single, -2.0).await.unwrap(), 0);
        assert_eq!(single.edge_writes(), 0);
    }

    #[tokio::test]
    async fn rerunning_converges_to_the_same_edges() {
        let graph = example_graph();
        let builder = SimilarityGraphBuilder::new(graph);

        let first = builder.build(EdgePolicy::TopK(2)).await.unwrap();
        let after_first = builder.graph().similarity_edges();
        let second = builder.build(EdgePolicy::TopK(2)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(builder.graph().similarity_edges(), after_first);

        builder.build(EdgePolicy::Threshold(0.99)).await.unwrap();
        let after_threshold = builder.graph().similarity_edges();
        builder.build(EdgePolicy::Threshold(0.99)).await.unwrap();
        assert_eq!(builder.into_inner().similarity_edges(), after_threshold);
    }

    #[tokio::test]
    async fn mismatched_dimensions_abort_before_writing() {
        let graph = MemoryGraph::with_embeddings([("a", vec![1.0, 0.0]), ("b", vec![1.0])]);
        let result = build_threshold_similarity(&graph, 0.0).await;

        assert!(matches!(result, Err(GraphError::DimensionMismatch { .. })));
        assert_eq!(graph.edge_writes(), 0);
    }

    struct FailingGraph {
        inner: MemoryGraph,
        fail_reads: bool,
        fail_after: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ChunkGraph for FailingGraph {
        async fn fetch_chunk_embeddings(&self) -> Result<Vec<ChunkEmbedding>, GraphError> {
            if self.fail_reads {
                return Err(GraphError::BackendResponse {
                    backend: "neo4j".to_string(),
                    details: "Neo.TransientError.General.DatabaseUnavailable".to_string(),
                });
            }
            self.inner.fetch_chunk_embeddings().await
        }

        async fn merge_similarity_edge(&self, edge: &SimilarityEdge) -> Result<(), GraphError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(GraphError::NotReady("connection dropped".to_string()));
            }
            self.inner.merge_similarity_edge(edge).await
        }

        async fn fetch_chunk_topics(&self) -> Result<Vec<ChunkTopic>, GraphError> {
            Ok(Vec::new())
        }

        async fn merge_topic_edge(&self, _edge: &TopicEdge) -> Result<(), GraphError> {
            Ok(())
        }

        async fn fetch_chunks_by_topic(
            &self,
            _topic_id: &str,
            _limit: usize,
        ) -> Result<Vec<ChunkTopic>, GraphError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn read_failure_aborts_before_any_write() {
        let graph = FailingGraph {
            inner: example_graph(),
            fail_reads: true,
            fail_after: usize::MAX,
            writes: AtomicUsize::new(0),
        };

        let topk = build_topk_similarity(&graph, 1).await;
        let threshold = build_threshold_similarity(&graph, 0.5).await;

        assert!(matches!(topk, Err(GraphError::BackendResponse { .. })));
        assert!(matches!(threshold, Err(GraphError::BackendResponse { .. })));
        assert_eq!(graph.writes.load(Ordering::SeqCst), 0);
        assert!(graph.inner.similarity_edges().is_empty());
    }

    #[tokio::test]
    async fn write_failure_propagates_and_keeps_partial_progress() {
        let graph = FailingGraph {
            inner: example_graph(),
            fail_reads: false,
            fail_after: 2,
            writes: AtomicUsize::new(0),
        };

        let result = build_topk_similarity(&graph, 1).await;

        assert!(matches!(result, Err(GraphError::NotReady(_))));
        assert_eq!(graph.inner.similarity_edges().len(), 2);
    }
}
