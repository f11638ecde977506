pub mod audit;
pub mod dedup;
pub mod entities;
pub mod error;
pub mod facts;
pub mod inference;
pub mod projection;
pub mod relations;
pub mod types;

/// Parse a TEXT column into a `FromStr` type, mapping failures onto
/// rusqlite's conversion error so row mappers stay fallible.
pub(crate) fn parse_col<T: std::str::FromStr>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T::Err: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert a cosine-similarity threshold to the equivalent L2 distance for
/// L2-normalized vectors: `d² = 2·(1 − cos)`.
///
/// sqlite-vec KNN queries return L2 distance; dedup thresholds are expressed
/// as cosine similarity.
pub fn cosine_threshold_to_l2(cosine_threshold: f64) -> f64 {
    (2.0 * (1.0 - cosine_threshold)).max(0.0).sqrt()
}

/// Cosine similarity equivalent of an L2 distance between L2-normalized vectors.
pub fn l2_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}
