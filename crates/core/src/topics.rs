//! `TOPIC_SIM` relationships between chunks that share a topic id.

use crate::traits::ChunkGraph;
use crate::{ChunkTopic, GraphError, TopicEdge};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicLinkMode {
    /// Link every pair within a topic.
    #[default]
    FullClique,
    /// Link each chunk to the next `k` chunks of its topic.
    Window(usize),
}

pub async fn build_topic_similarity<G>(graph: &G, mode: TopicLinkMode) -> Result<usize, GraphError>
where
    G: ChunkGraph + ?Sized,
{
    info!(?mode, "building TOPIC_SIM edges");
    let topics = graph.fetch_chunk_topics().await?;
    info!(chunk_count = topics.len(), "retrieved chunks with a topic id");

    if topics.len() < 2 {
        info!("not enough chunks with a topic id to form relationships");
        return Ok(0);
    }

    let mut written = 0;
    for edge in plan_topic_edges(&topics, mode) {
        graph.merge_topic_edge(&edge).await?;
        written += 1;
    }

    info!(edges = written, "TOPIC_SIM edges written");
    Ok(written)
}

/// Topic groups in first-seen order, each listing chunk ids in input order.
pub fn group_by_topic(topics: &[ChunkTopic]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    let mut index = HashMap::new();

    for assignment in topics {
        let slot = *index.entry(assignment.topic_id.clone()).or_insert_with(|| {
            groups.push((assignment.topic_id.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(assignment.chunk_id.clone());
    }

    groups
}

pub fn plan_topic_edges(topics: &[ChunkTopic], mode: TopicLinkMode) -> Vec<TopicEdge> {
    let mut edges = Vec::new();

    for (_topic, members) in group_by_topic(topics) {
        if members.len() < 2 {
            continue;
        }

        for (i, source) in members.iter().enumerate() {
            let upper = match mode {
                TopicLinkMode::FullClique => members.len(),
                TopicLinkMode::Window(k) => members.len().min(i.saturating_add(1).saturating_add(k)),
            };
            for target in &members[i + 1..upper] {
                edges.push(TopicEdge {
                    source_id: source.clone(),
                    target_id: target.clone(),
                });
            }
        }
    }

    edges
}
