//! Distance ↔ similarity conversion for the self-hosted vector store.
//!
//! Similarity is a bounded linear transform of Euclidean distance, calibrated so
//! that a distance of 0.6 reads as 60%. The two functions are exact inverses on
//! the unclamped range so a similarity threshold maps back to a distance
//! threshold without loss.

/// Euclidean distance that maps to 0% similarity.
pub const MAX_DISTANCE: f32 = 1.5;

/// Similarity percentage in [0, 100], rounded to two decimals.
pub fn distance_to_similarity(distance: f32) -> f32 {
    let pct = (100.0 * (1.0 - distance / MAX_DISTANCE)).clamp(0.0, 100.0);
    (pct * 100.0).round() / 100.0
}

/// Euclidean distance for a similarity percentage.
pub fn similarity_to_distance(similarity_pct: f32) -> f32 {
    MAX_DISTANCE * (1.0 - similarity_pct / 100.0)
}

/// Euclidean distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
