use crate::similarity::{cosine_similarity, sort_descending};
use crate::traits::ChunkGraph;
use crate::{ChunkTopic, GraphError, HybridHit, RankedChunk};
use std::collections::HashMap;
use tracing::{debug, info};

pub const DEFAULT_TOPIC_CANDIDATES: usize = 3;
pub const DEFAULT_MAX_PER_TOPIC: usize = 5;
pub const DEFAULT_TOPIC_WEIGHT: f64 = 0.3;

/// Knobs for [`hybrid_retrieve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridOptions {
    /// Size of the embedding candidate list and of the final result.
    pub top_k: usize,
    /// How many of the best embedding hits contribute their topic.
    pub topic_candidates: usize,
    pub max_per_topic: usize,
    /// Share of the score given to topic membership, in `[0, 1]`.
    pub topic_weight: f64,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            topic_candidates: DEFAULT_TOPIC_CANDIDATES,
            max_per_topic: DEFAULT_MAX_PER_TOPIC,
            topic_weight: DEFAULT_TOPIC_WEIGHT,
        }
    }
}

/// The `top_k` stored chunks closest to `query` by cosine similarity.
///
/// A linear scan over every embedded chunk; ties keep store order.
pub async fn nearest_chunks<G>(
    graph: &G,
    query: &[f32],
    top_k: usize,
) -> Result<Vec<RankedChunk>, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    let chunks = graph.fetch_chunk_embeddings().await?;
    debug!(chunk_count = chunks.len(), top_k, "ranking chunks against query");

    let mut scored = chunks
        .into_iter()
        .map(|chunk| -> Result<(String, f64), GraphError> {
            let similarity = cosine_similarity(query, &chunk.embedding)?;
            Ok((chunk.chunk_id, similarity))
        })
        .collect::<Result<Vec<_>, GraphError>>()?;

    sort_descending(&mut scored);
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(chunk_id, similarity)| RankedChunk {
            chunk_id,
            similarity,
        })
        .collect())
}

/// Distinct topic ids of the first `top_n` ranked chunks, in rank order.
/// Chunks without a topic are passed over.
pub fn topic_ids_from_ranked(
    ranked: &[RankedChunk],
    topics: &[ChunkTopic],
    top_n: usize,
) -> Vec<String> {
    let topic_of: HashMap<&str, &str> = topics
        .iter()
        .map(|topic| (topic.chunk_id.as_str(), topic.topic_id.as_str()))
        .collect();

    let mut topic_ids: Vec<String> = Vec::new();
    for hit in ranked.iter().take(top_n) {
        if let Some(topic_id) = topic_of.get(hit.chunk_id.as_str()) {
            if !topic_ids.iter().any(|seen| seen == topic_id) {
                topic_ids.push((*topic_id).to_string());
            }
        }
    }
    topic_ids
}

/// Blend embedding similarity with topic membership.
///
/// The `top_k` nearest chunks are taken first. The topics of the best
/// `topic_candidates` of them are expanded to at most `max_per_topic` members
/// each; members not already present join with similarity 0.0. Every chunk is
/// scored `(1 - w) * similarity + w * topic_relevant` and the best `top_k`
/// are returned. Ties keep first-seen order.
pub async fn hybrid_retrieve<G>(
    graph: &G,
    query: &[f32],
    options: HybridOptions,
) -> Result<Vec<HybridHit>, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    let weight = options.topic_weight;
    if !(0.0..=1.0).contains(&weight) {
        return Err(GraphError::InvalidArgument(format!(
            "topic weight must be within [0, 1], got {weight}"
        )));
    }

    let ranked = nearest_chunks(graph, query, options.top_k).await?;
    let topics = graph.fetch_chunk_topics().await?;
    let topic_ids = topic_ids_from_ranked(&ranked, &topics, options.topic_candidates);
    let topic_of: HashMap<&str, &str> = topics
        .iter()
        .map(|topic| (topic.chunk_id.as_str(), topic.topic_id.as_str()))
        .collect();

    let mut hits: Vec<HybridHit> = ranked
        .into_iter()
        .map(|hit| HybridHit {
            topic_id: topic_of.get(hit.chunk_id.as_str()).map(|topic| topic.to_string()),
            chunk_id: hit.chunk_id,
            similarity: hit.similarity,
            topic_relevant: false,
            score: 0.0,
        })
        .collect();
    let mut index: HashMap<String, usize> = hits
        .iter()
        .enumerate()
        .map(|(position, hit)| (hit.chunk_id.clone(), position))
        .collect();

    for topic_id in &topic_ids {
        let members = graph.fetch_chunks_by_topic(topic_id, options.max_per_topic).await?;
        debug!(topic = %topic_id, members = members.len(), "expanding topic");

        for member in members {
            match index.get(&member.chunk_id) {
                Some(&position) => hits[position].topic_relevant = true,
                None => {
                    index.insert(member.chunk_id.clone(), hits.len());
                    hits.push(HybridHit {
                        chunk_id: member.chunk_id,
                        topic_id: Some(member.topic_id),
                        similarity: 0.0,
                        topic_relevant: true,
                        score: 0.0,
                    });
                }
            }
        }
    }

    for hit in &mut hits {
        let topic_score = if hit.topic_relevant { 1.0 } else { 0.0 };
        hit.score = (1.0 - weight) * hit.similarity + weight * topic_score;
    }
    hits.sort_by(|left, right| right.score.total_cmp(&left.score));
    hits.truncate(options.top_k);

    info!(
        topics = topic_ids.len(),
        returned = hits.len(),
        "hybrid retrieval finished"
    );
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryGraph;

    #[tokio::test]
    async fn nearest_chunks_are_ranked_and_truncated() {
        let graph = MemoryGraph::with_embeddings([
            ("far", vec![-1.0, 0.0]),
            ("near", vec![0.9, 0.1]),
            ("exact", vec![2.0, 0.0]),
        ]);

        let hits = nearest_chunks(&graph, &[1.0, 0.0], 2).await.unwrap();

        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn query_dimension_must_match() {
        let graph = MemoryGraph::with_embeddings([("a", vec![1.0, 0.0, 0.0])]);
        let result = nearest_chunks(&graph, &[1.0, 0.0], 1).await;
        assert!(matches!(result, Err(GraphError::DimensionMismatch { .. })));
    }

    fn ranked(ids: &[&str]) -> Vec<RankedChunk> {
        ids.iter()
            .map(|id| RankedChunk {
                chunk_id: id.to_string(),
                similarity: 1.0,
            })
            .collect()
    }

    fn topic(chunk_id: &str, topic_id: &str) -> ChunkTopic {
        ChunkTopic {
            chunk_id: chunk_id.to_string(),
            topic_id: topic_id.to_string(),
        }
    }

    #[test]
    fn topic_ids_are_distinct_and_limited_to_the_best_hits() {
        let topics = vec![topic("a", "1"), topic("b", "1"), topic("c", "2"), topic("e", "3")];

        let ids = topic_ids_from_ranked(&ranked(&["b", "d", "a", "c", "e"]), &topics, 4);

        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }

    /// `q` and `r` match the query, `q` shares topic 1 with `t1`/`t2`, and
    /// `far` points away from the query.
    fn topic_graph() -> MemoryGraph {
        let graph = MemoryGraph::with_embeddings([
            ("q", vec![1.0, 0.0]),
            ("r", vec![0.8, 0.6]),
            ("t1", vec![0.0, 1.0]),
            ("t2", vec![-0.6, 0.8]),
            ("far", vec![-1.0, 0.0]),
        ]);
        graph.set_topic("q", "1");
        graph.set_topic("t1", "1");
        graph.set_topic("t2", "1");
        graph.set_topic("r", "2");
        graph
    }

    #[tokio::test]
    async fn hybrid_scores_blend_similarity_and_topic() {
        let graph = topic_graph();
        let options = HybridOptions {
            top_k: 2,
            topic_candidates: 1,
            max_per_topic: 5,
            topic_weight: 0.3,
        };

        let hits = hybrid_retrieve(&graph, &[1.0, 0.0], options).await.unwrap();

        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["q", "r"]);
        assert!(hits[0].topic_relevant);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(!hits[1].topic_relevant);
        assert!((hits[1].score - 0.7 * 0.8).abs() < 1e-6);
        assert_eq!(hits[1].topic_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn topic_members_join_with_zero_similarity() {
        let graph = topic_graph();
        let options = HybridOptions {
            top_k: 2,
            topic_candidates: 1,
            max_per_topic: 5,
            topic_weight: 0.9,
        };

        let hits = hybrid_retrieve(&graph, &[1.0, 0.0], options).await.unwrap();

        // q: 0.1 + 0.9, t1: 0.9, r: 0.08.
        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["q", "t1"]);
        assert_eq!(hits[1].similarity, 0.0);
        assert!(hits[1].topic_relevant);
        assert!((hits[1].score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_weight_matches_plain_ranking() {
        let graph = topic_graph();
        let options = HybridOptions {
            top_k: 3,
            topic_weight: 0.0,
            ..HybridOptions::default()
        };

        let hybrid = hybrid_retrieve(&graph, &[1.0, 0.0], options).await.unwrap();
        let plain = nearest_chunks(&graph, &[1.0, 0.0], 3).await.unwrap();

        let hybrid_ids: Vec<_> = hybrid.iter().map(|hit| hit.chunk_id.as_str()).collect();
        let plain_ids: Vec<_> = plain.iter().map(|hit| hit.chunk_id.as_str()).collect();
        assert_eq!(hybrid_ids, plain_ids);
    }

    #[tokio::test]
    async fn topic_weight_outside_unit_range_is_rejected() {
        let graph = topic_graph();
        let options = HybridOptions {
            topic_weight: 1.5,
            ..HybridOptions::default()
        };

        let result = hybrid_retrieve(&graph, &[1.0, 0.0], options).await;
        assert!(matches!(result, Err(GraphError::InvalidArgument(_))));
    }
}
