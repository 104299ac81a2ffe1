use crate::manifest::manifest_dimensions;
use crate::{ChunkManifest, IngestError};
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Turns chunk text into a fixed-length vector.
///
/// Implementations are plain values owned by the caller and passed to the
/// functions that need them.
pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Hashed character-trigram bag, L2-normalised.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    /// Never less than one; a zero setting still yields one-element vectors.
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; Embedder::dimensions(self)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let bucket = (fnv1a(window) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vector.iter_mut().for_each(|value| *value /= magnitude);
        }

        vector
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut buffer = [0u8; 4];
    for ch in window {
        for byte in ch.encode_utf8(&mut buffer).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Fill in embeddings for chunks that have content but no vector yet.
/// Returns how many chunks were embedded.
///
/// Fails without touching the manifest when its existing vectors disagree in
/// length, with each other or with `embedder.dimensions()`.
pub fn embed_missing<E>(manifest: &mut ChunkManifest, embedder: &E) -> Result<usize, IngestError>
where
    E: Embedder + ?Sized,
{
    if let Some(existing) = manifest_dimensions(manifest)? {
        if existing != embedder.dimensions() {
            let document = manifest
                .files
                .iter()
                .find(|document| document.chunks.iter().any(|chunk| !chunk.embedding.is_empty()))
                .map(|document| document.file_name.clone())
                .unwrap_or_default();
            return Err(IngestError::InconsistentDimensions {
                document,
                expected: existing,
                found: embedder.dimensions(),
            });
        }
    }

    let mut embedded = 0;
    for document in &mut manifest.files {
        for chunk in &mut document.chunks {
            if !chunk.embedding.is_empty() || chunk.content.trim().is_empty() {
                continue;
            }
            chunk.embedding = embedder.embed(&chunk.content);
            embedded += 1;
        }
        debug!(document = %document.file_name, "embedded missing chunk vectors");
    }
    Ok(embedded)
}
