use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::loader::BatchLoader;
use crate::{DataProviderError, TokenizedDataProvider};

const TOKEN_BYTES: usize = 4;

/// Pre-tokenized corpus stored as raw little-endian u32 token files on local
/// disk. All `.bin` files in the directory are concatenated in filename
/// order and carved into fixed-size pages.
pub struct LocalDataProvider {
    files: Vec<TokenFile>,
    tokens_per_page: u64,
    total_tokens: u64,
}

struct TokenFile {
    path: PathBuf,
    /// global token offset of this file's first token
    start: u64,
    tokens: u64,
}

impl LocalDataProvider {
    pub fn new_from_directory(
        dir: &Path,
        tokens_per_page: u64,
    ) -> Result<Self, DataProviderError> {
        if tokens_per_page == 0 {
            return Err(DataProviderError::ZeroPageSize);
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "bin").unwrap_or(false))
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(DataProviderError::NoDataFiles(dir.to_path_buf()));
        }

        let mut files = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let bytes = std::fs::metadata(&path)?.len();
            if bytes % TOKEN_BYTES as u64 != 0 {
                return Err(DataProviderError::MisalignedTokenFile {
                    path,
                    token_bytes: TOKEN_BYTES,
                });
            }
            let tokens = bytes / TOKEN_BYTES as u64;
            files.push(TokenFile {
                path,
                start,
                tokens,
            });
            start += tokens;
        }

        let provider = Self {
            files,
            tokens_per_page,
            total_tokens: start,
        };
        info!(
            dir = %dir.display(),
            files = provider.files.len(),
            total_tokens = provider.total_tokens,
            max_page = provider.max_page(),
            "indexed local token corpus"
        );
        Ok(provider)
    }

    fn read_span(&self, mut offset: u64, mut count: u64) -> Result<Vec<u32>, DataProviderError> {
        let mut out = Vec::with_capacity(count as usize);
        while count > 0 {
            let file = match self
                .files
                .iter()
                .rev()
                .find(|f| f.start <= offset && offset < f.start + f.tokens)
            {
                Some(f) => f,
                None => break,
            };
            let within = offset - file.start;
            let take = count.min(file.tokens - within);
            let mut handle = File::open(&file.path)?;
            handle.seek(SeekFrom::Start(within * TOKEN_BYTES as u64))?;
            let mut buf = vec![0u8; (take as usize) * TOKEN_BYTES];
            handle.read_exact(&mut buf)?;
            out.extend(
                buf.chunks_exact(TOKEN_BYTES)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
            offset += take;
            count -= take;
        }
        Ok(out)
    }
}

impl TokenizedDataProvider for LocalDataProvider {
    fn max_page(&self) -> u64 {
        self.total_tokens / self.tokens_per_page
    }

    fn make_loader(
        &self,
        pages: &[u64],
        batch_size: usize,
        sequence_length: usize,
    ) -> Result<BatchLoader, DataProviderError> {
        let max_page = self.max_page();
        let mut tokens = Vec::with_capacity(pages.len() * self.tokens_per_page as usize);
        for &page in pages {
            if page == 0 || page > max_page {
                return Err(DataProviderError::PageOutOfRange { page, max_page });
            }
            let offset = (page - 1) * self.tokens_per_page;
            tokens.extend(self.read_span(offset, self.tokens_per_page)?);
        }
        Ok(BatchLoader::new(tokens, batch_size, sequence_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tokens(path: &Path, tokens: &[u32]) {
        let mut file = File::create(path).unwrap();
        for t in tokens {
            file.write_all(&t.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn pages_split_across_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        write_tokens(&dir.path().join("a.bin"), &(0..10).collect::<Vec<_>>());
        write_tokens(&dir.path().join("b.bin"), &(10..20).collect::<Vec<_>>());

        let provider = LocalDataProvider::new_from_directory(dir.path(), 8).unwrap();
        assert_eq!(provider.max_page(), 2);

        // page 2 spans the file boundary at token 10
        let loader = provider.make_loader(&[2], 2, 4).unwrap();
        let batches: Vec<_> = loader.collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].rows()[0], vec![8, 9, 10, 11]);
        assert_eq!(batches[0].rows()[1], vec![12, 13, 14, 15]);
    }

    #[test]
    fn rejects_out_of_range_pages() {
        let dir = tempfile::tempdir().unwrap();
        write_tokens(&dir.path().join("a.bin"), &(0..16).collect::<Vec<_>>());
        let provider = LocalDataProvider::new_from_directory(dir.path(), 8).unwrap();
        assert!(matches!(
            provider.make_loader(&[3], 1, 4),
            Err(DataProviderError::PageOutOfRange { page: 3, max_page: 2 })
        ));
        assert!(matches!(
            provider.make_loader(&[0], 1, 4),
            Err(DataProviderError::PageOutOfRange { page: 0, .. })
        ));
    }

    #[test]
    fn zero_page_size_is_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_tokens(&dir.path().join("a.bin"), &(0..16).collect::<Vec<_>>());
        assert!(matches!(
            LocalDataProvider::new_from_directory(dir.path(), 0),
            Err(DataProviderError::ZeroPageSize)
        ));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LocalDataProvider::new_from_directory(dir.path(), 8),
            Err(DataProviderError::NoDataFiles(_))
        ));
    }

    #[test]
    fn misaligned_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), [1u8, 2, 3]).unwrap();
        assert!(matches!(
            LocalDataProvider::new_from_directory(dir.path(), 8),
            Err(DataProviderError::MisalignedTokenFile { .. })
        ));
    }
}
