use serde::Serialize;

/// A record to insert: one embedded chunk with its provenance.
#[derive(Debug, Clone)]
pub struct ChunkRecord<'a> {
    pub text: &'a str,
    pub filename: &'a str,
    pub path: &'a str,
    pub vector: &'a [f32],
}

/// Stored fields of a chunk, without its vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub text: String,
    pub filename: String,
    pub path: String,
}

/// One nearest-neighbour hit. Smaller `distance` means more similar.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub distance: f64,
    pub entity: Entity,
}
