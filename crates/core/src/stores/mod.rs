pub mod memory;
pub mod neo4j;

pub use memory::MemoryGraph;
pub use neo4j::Neo4jStore;
