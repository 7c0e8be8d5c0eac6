use std::path::PathBuf;

use thiserror::Error;

mod dummy;
mod loader;
mod local;
mod sampling;

pub use dummy::DummyDataProvider;
pub use loader::BatchLoader;
pub use local::LocalDataProvider;
pub use sampling::sample_pages;

#[derive(Error, Debug)]
pub enum DataProviderError {
    #[error("data io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no token data files found in {0}")]
    NoDataFiles(PathBuf),

    #[error("token file {path} is not a whole number of {token_bytes}-byte tokens")]
    MisalignedTokenFile { path: PathBuf, token_bytes: usize },

    #[error("page {page} out of range, corpus has pages 1..={max_page}")]
    PageOutOfRange { page: u64, max_page: u64 },

    #[error("tokens per page must be at least 1")]
    ZeroPageSize,
}

/// A source of pre-tokenized training text, addressed by page index.
/// Pages are numbered `1..=max_page` and each holds a fixed number of tokens.
pub trait TokenizedDataProvider: Send + Sync {
    fn max_page(&self) -> u64;

    /// Builds a finite, non-restartable loader over the given pages in
    /// order. Tokens left over after the last full batch are dropped.
    fn make_loader(
        &self,
        pages: &[u64],
        batch_size: usize,
        sequence_length: usize,
    ) -> Result<BatchLoader, DataProviderError>;
}
