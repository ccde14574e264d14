//! Contiguous batch partitioning for HTTP-level JSON-RPC batches.

/// Split `items` into contiguous runs of at most `batch_size` elements.
///
/// A zero batch size yields no batches at all; callers treat that as
/// "nothing to submit" rather than an error.
pub fn generate_batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    if batch_size == 0 {
        return Vec::new();
    }
    items.chunks(batch_size).map(|c| c.to_vec()).collect()
}
