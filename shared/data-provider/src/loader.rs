use crucible_core::TokenBatch;

/// Iterator slicing a token stream into `[batch_size, sequence_length]`
/// batches. Finite and consumed as it goes; a fresh loader is built for
/// every epoch.
pub struct BatchLoader {
    tokens: Vec<u32>,
    batch_size: usize,
    sequence_length: usize,
    cursor: usize,
}

impl BatchLoader {
    pub fn new(tokens: Vec<u32>, batch_size: usize, sequence_length: usize) -> Self {
        Self {
            tokens,
            batch_size,
            sequence_length,
            cursor: 0,
        }
    }
}

impl Iterator for BatchLoader {
    type Item = TokenBatch;

    fn next(&mut self) -> Option<TokenBatch> {
        let needed = self.batch_size * self.sequence_length;
        if needed == 0 || self.tokens.len() - self.cursor < needed {
            return None;
        }
        let rows = (0..self.batch_size)
            .map(|_| {
                let row = self.tokens[self.cursor..self.cursor + self.sequence_length].to_vec();
                self.cursor += self.sequence_length;
                row
            })
            .collect();
        Some(TokenBatch::new(rows))
    }
}
