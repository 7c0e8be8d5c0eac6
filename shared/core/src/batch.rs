/// One training micro-batch of token ids, shaped `[batch_size, sequence_length]`.
/// Every row has the same length; loaders never emit ragged batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBatch {
    rows: Vec<Vec<u32>>,
}

impl TokenBatch {
    /// Builds a batch from equal-length rows. Panics in debug builds if the
    /// rows are ragged; loaders are responsible for never producing that.
    pub fn new(rows: Vec<Vec<u32>>) -> Self {
        debug_assert!(!rows.is_empty());
        debug_assert!(rows.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { rows }
    }

    pub fn batch_size(&self) -> usize {
        self.rows.len()
    }

    pub fn sequence_length(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }

    /// Row-major flattened view, the layout tensor constructors want.
    pub fn flattened(&self) -> Vec<u32> {
        self.rows.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_accessors() {
        let batch = TokenBatch::new(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.sequence_length(), 3);
        assert_eq!(batch.flattened(), vec![1, 2, 3, 4, 5, 6]);
    }
}
