//! Batch arithmetic shared by the caption and embedding stages

/// Number of batches needed for `len` items at `batch_size` per batch.
///
/// `batch_size` of zero is treated as one.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// Split `items` into consecutive batches of at most `batch_size`.
///
/// Concatenating the batches reproduces `items` exactly once, in order. Every
/// batch but the last holds `batch_size` items; the last holds
/// `len % batch_size`, or `batch_size` when the split is even.
pub fn partition<T>(items: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_splitting() {
        let items: Vec<usize> = (0..10).collect();
        let batches: Vec<_> = partition(&items, 3).collect();

        assert_eq!(batches.len(), 4);
        assert_eq!(batch_count(items.len(), 3), 4);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[3].len(), 1);
    }

    #[test]
    fn test_partition_reproduces_input() {
        for len in 0..40usize {
            for size in 1..12usize {
                let items: Vec<usize> = (0..len).collect();
                let batches: Vec<&[usize]> = partition(&items, size).collect();

                let flattened: Vec<usize> =
                    batches.iter().flat_map(|b| b.iter().copied()).collect();
                assert_eq!(flattened, items);
                assert_eq!(batches.len(), batch_count(len, size));

                if let Some(last) = batches.last() {
                    let expected = if len % size == 0 { size } else { len % size };
                    assert_eq!(last.len(), expected);
                    assert!(batches[..batches.len() - 1].iter().all(|b| b.len() == size));
                }
            }
        }
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let items = [1, 2, 3];
        assert_eq!(partition(&items, 0).count(), 3);
        assert_eq!(batch_count(3, 0), 3);
    }
}
