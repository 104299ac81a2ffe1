use chrono::Utc;
use chunk_graph_core::{
    build_topic_similarity, embed_missing, hybrid_retrieve, load_manifests_best_effort,
    manifest_dimensions, nearest_chunks, store_manifest, CharacterNgramEmbedder, EdgePolicy,
    Embedder, HybridOptions, Neo4jStore, SimilarityGraphBuilder, TopicLinkMode,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_MAX_PER_TOPIC, DEFAULT_THRESHOLD,
    DEFAULT_TOPIC_CANDIDATES,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chunk-graph", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Neo4j HTTP base URL
    #[arg(long, env = "NEO4J_URL", default_value = "http://localhost:7474", global = true)]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DB", default_value = "neo4j", global = true)]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j", global = true)]
    neo4j_user: String,

    /// Neo4j password
    #[arg(
        long,
        env = "NEO4J_PASSWORD",
        default_value = "password",
        hide_env_values = true,
        global = true
    )]
    neo4j_password: String,
}

#[derive(Subcommand)]
enum Command {
    /// Store chunk manifests (a JSON file or a folder of them) as Document and Chunk nodes.
    Store {
        /// Manifest file or folder containing manifests recursively.
        #[arg(long)]
        input: String,
        /// Delete every node and relationship before storing.
        #[arg(long, default_value_t = false)]
        clear: bool,
        /// Embed chunks that carry content but no vector.
        #[arg(long, default_value_t = false)]
        embed_missing: bool,
        /// Vector size used by --embed-missing. Defaults to the length of the
        /// vectors already in the manifests, else 128.
        #[arg(long)]
        dimensions: Option<usize>,
    },
    /// Create EMBEDDING_SIM edges between stored chunks.
    LinkEmbeddings {
        /// Link each chunk to its K most similar chunks.
        #[arg(long, conflicts_with = "threshold")]
        top_k: Option<usize>,
        /// Link every pair with similarity at or above this value.
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Create TOPIC_SIM edges between chunks sharing a topic_id.
    LinkTopics {
        /// Link each chunk to the next K chunks of its topic instead of the full clique.
        #[arg(long)]
        window: Option<usize>,
    },
    /// Rank stored chunks against a text query or a query vector.
    ///
    /// --text is embedded with the built-in character-trigram embedder, so it
    /// only ranks meaningfully against vectors written by `store --embed-missing`
    /// with the same --dimensions. For vectors from any other model, embed the
    /// query with that model and pass it through --vector-file.
    Query {
        /// Query text, embedded with the character-trigram embedder.
        #[arg(long, required_unless_present = "vector_file", conflicts_with = "vector_file")]
        text: Option<String>,
        /// JSON file holding the query vector as an array of numbers.
        #[arg(long)]
        vector_file: Option<PathBuf>,
        /// Number of chunks to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Vector size for --text; must match the stored embeddings.
        #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
        dimensions: usize,
        /// Blend in topic membership with this weight in [0, 1] (hybrid retrieval).
        #[arg(long)]
        topic_weight: Option<f64>,
        /// Number of best hits whose topics are expanded in hybrid retrieval.
        #[arg(long, default_value_t = DEFAULT_TOPIC_CANDIDATES)]
        topic_candidates: usize,
        /// Chunks fetched per expanded topic in hybrid retrieval.
        #[arg(long, default_value_t = DEFAULT_MAX_PER_TOPIC)]
        max_per_topic: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let graph = Neo4jStore::new(
        &cli.neo4j_url,
        &cli.neo4j_db,
        &cli.neo4j_user,
        &cli.neo4j_password,
    );
    info!(
        version = app_version,
        neo4j = %cli.neo4j_url,
        started_at = %Utc::now().to_rfc3339(),
        "chunk-graph boot"
    );

    match cli.command {
        Command::Store {
            input,
            clear,
            embed_missing: fill_missing,
            dimensions,
        } => {
            let report = load_manifests_best_effort(Path::new(&input))
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for input={}",
                    report.skipped_files.len(),
                    input
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped manifest");
                }
            }

            let mut manifest = report.manifest;
            if fill_missing {
                let dimensions = match dimensions {
                    Some(dimensions) => dimensions,
                    None => manifest_dimensions(&manifest)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?
                        .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
                };
                let embedder = CharacterNgramEmbedder { dimensions };
                let embedded = embed_missing(&mut manifest, &embedder)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                info!(embedded, dimensions = embedder.dimensions(), "embedded chunks without vectors");
            }

            info!(input = %input, chunk_count = manifest.chunk_count(), "storing chunks");
            let stored = store_manifest(&graph, &manifest, clear)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "{} documents, {} chunks stored at {}",
                stored.documents,
                stored.chunks,
                Utc::now().to_rfc3339()
            );
        }
        Command::LinkEmbeddings { top_k, threshold } => {
            let policy = match (top_k, threshold) {
                (Some(k), _) => EdgePolicy::TopK(k),
                (None, Some(threshold)) => EdgePolicy::Threshold(threshold),
                (None, None) => EdgePolicy::Threshold(DEFAULT_THRESHOLD),
            };

            let builder = SimilarityGraphBuilder::new(graph);
            let written = builder
                .build(policy)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{written} EMBEDDING_SIM edge merges issued ({policy:?})");
        }
        Command::LinkTopics { window } => {
            let mode = window.map_or(TopicLinkMode::FullClique, TopicLinkMode::Window);
            let written = build_topic_similarity(&graph, mode)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{written} TOPIC_SIM edge merges issued ({mode:?})");
        }
        Command::Query {
            text,
            vector_file,
            top_k,
            dimensions,
            topic_weight,
            topic_candidates,
            max_per_topic,
        } => {
            let query_vector = match (&text, &vector_file) {
                (_, Some(path)) => read_query_vector(path)?,
                (Some(text), None) if !text.trim().is_empty() => {
                    CharacterNgramEmbedder { dimensions }.embed(text)
                }
                _ => anyhow::bail!("query is empty"),
            };

            match (&text, &vector_file) {
                (Some(text), _) => println!("query: {text}"),
                (None, Some(path)) => println!("query vector: {}", path.display()),
                (None, None) => {}
            }

            if let Some(topic_weight) = topic_weight {
                let options = HybridOptions {
                    top_k,
                    topic_candidates,
                    max_per_topic,
                    topic_weight,
                };
                let hits = hybrid_retrieve(&graph, &query_vector, options)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                for hit in hits {
                    println!(
                        "score={:.4} similarity={:.4} topic={} chunk={}",
                        hit.score,
                        hit.similarity,
                        hit.topic_id.as_deref().unwrap_or("-"),
                        hit.chunk_id
                    );
                }
            } else {
                let hits = nearest_chunks(&graph, &query_vector, top_k)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                for hit in hits {
                    println!("similarity={:.4} chunk={}", hit.similarity, hit.chunk_id);
                }
            }
        }
    }

    Ok(())
}

fn read_query_vector(path: &Path) -> anyhow::Result<Vec<f32>> {
    let raw = std::fs::read(path)?;
    let vector: Vec<f32> = serde_json::from_slice(&raw)?;
    if vector.is_empty() {
        anyhow::bail!("query vector in {} is empty", path.display());
    }
    Ok(vector)
}
