use crate::loader::BatchLoader;
use crate::{DataProviderError, TokenizedDataProvider};

/// Deterministic in-memory provider for tests. Page `p` yields the token
/// stream `p, p+1, p+2, ...` modulo the vocab size, so token values identify
/// which page they came from.
pub struct DummyDataProvider {
    max_page: u64,
    tokens_per_page: u64,
    vocab_size: u32,
}

impl DummyDataProvider {
    pub fn new(max_page: u64, tokens_per_page: u64, vocab_size: u32) -> Self {
        Self {
            max_page,
            tokens_per_page,
            vocab_size,
        }
    }

    /// A provider whose pages hold no tokens at all, so every loader built
    /// from it is empty.
    pub fn empty() -> Self {
        Self::new(10, 0, 1)
    }
}

impl TokenizedDataProvider for DummyDataProvider {
    fn max_page(&self) -> u64 {
        self.max_page
    }

    fn make_loader(
        &self,
        pages: &[u64],
        batch_size: usize,
        sequence_length: usize,
    ) -> Result<BatchLoader, DataProviderError> {
        let mut tokens = Vec::with_capacity(pages.len() * self.tokens_per_page as usize);
        for &page in pages {
            if page == 0 || page > self.max_page {
                return Err(DataProviderError::PageOutOfRange {
                    page,
                    max_page: self.max_page,
                });
            }
            tokens.extend(
                (0..self.tokens_per_page).map(|i| ((page + i) % self.vocab_size as u64) as u32),
            );
        }
        Ok(BatchLoader::new(tokens, batch_size, sequence_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_content_is_deterministic() {
        let provider = DummyDataProvider::new(5, 6, 100);
        let a: Vec<_> = provider.make_loader(&[3], 1, 6).unwrap().collect();
        let b: Vec<_> = provider.make_loader(&[3], 1, 6).unwrap().collect();
        assert_eq!(a, b);
        assert_eq!(a[0].rows()[0], vec![3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn empty_provider_yields_no_batches() {
        let provider = DummyDataProvider::empty();
        assert_eq!(provider.make_loader(&[1], 2, 4).unwrap().count(), 0);
    }
}
