use rand::Rng;

/// Draws `pages_per_epoch` page indices uniformly from `1..=max_page`,
/// with replacement. Duplicates are expected and fine; over many epochs
/// the corpus gets covered in expectation.
pub fn sample_pages<R: Rng>(max_page: u64, pages_per_epoch: usize, rng: &mut R) -> Vec<u64> {
    if max_page == 0 {
        return Vec::new();
    }
    (0..pages_per_epoch)
        .map(|_| rng.gen_range(1..=max_page))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn samples_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pages = sample_pages(13, 100, &mut rng);
        assert_eq!(pages.len(), 100);
        assert!(pages.iter().all(|&p| (1..=13).contains(&p)));
    }

    #[test]
    fn sampling_is_with_replacement() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pages = sample_pages(3, 50, &mut rng);
        let mut unique = pages.clone();
        unique.sort_unstable();
        unique.dedup();
        assert!(unique.len() < pages.len());
    }

    #[test]
    fn empty_corpus_samples_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(sample_pages(0, 10, &mut rng).is_empty());
    }

    #[test]
    fn seeded_sampling_is_deterministic() {
        let a = sample_pages(100, 20, &mut ChaCha8Rng::seed_from_u64(42));
        let b = sample_pages(100, 20, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }
}
