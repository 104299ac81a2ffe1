use crate::traits::DocumentGraph;
use crate::{ChunkManifest, GraphError, StoreReport};
use tracing::{info, warn};

/// Write every document of `manifest` into the graph.
///
/// With `clear` set, the whole database is wiped first. Documents without a
/// file name and chunks without an id are skipped.
pub async fn store_manifest<G>(
    graph: &G,
    manifest: &ChunkManifest,
    clear: bool,
) -> Result<StoreReport, GraphError>
where
    G: DocumentGraph + ?Sized,
{
    if clear {
        warn!("clearing all nodes and relationships before storing");
        graph.clear_all().await?;
    }
    graph.ensure_constraints().await?;

    let mut report = StoreReport::default();
    for document in &manifest.files {
        if document.file_name.is_empty() {
            warn!(chunks = document.chunks.len(), "skipping document without file_name");
            continue;
        }

        let missing_ids = document
            .chunks
            .iter()
            .filter(|chunk| chunk.chunk_id.is_empty())
            .count();
        if missing_ids > 0 {
            warn!(document = %document.file_name, missing_ids, "skipping chunks without chunk_id");
        }

        report.chunks += graph.store_document(document).await?;
        report.documents += 1;
    }

    info!(
        documents = report.documents,
        chunks = report.chunks,
        "stored documents and chunks"
    );
    Ok(report)
}
