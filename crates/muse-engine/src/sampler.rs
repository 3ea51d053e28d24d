//! Random seed selection with recent-history exclusion.

use muse_store::ArtworkStore;
use muse_vector::ArtworkId;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashSet, VecDeque};

/// Draws uniformly random starting artworks, avoiding immediate repeats.
///
/// A rolling window of the last `history` seeds is excluded via
/// reject-and-resample. The exclusion switches itself off when the active
/// set is no larger than the window, so sampling can never starve; as an
/// extra guard, rejection gives up after a bounded number of attempts and
/// returns the last draw.
pub struct SeedSampler {
    history_cap: usize,
    history: Mutex<SeedHistory>,
}

struct SeedHistory {
    order: VecDeque<ArtworkId>,
    members: HashSet<ArtworkId>,
}

impl SeedHistory {
    fn record(&mut self, id: ArtworkId, cap: usize) {
        if cap == 0 {
            return;
        }

        if self.members.contains(&id) {
            // Refresh recency instead of duplicating.
            if let Some(pos) = self.order.iter().position(|seen| seen == &id) {
                self.order.remove(pos);
            }
            self.order.push_back(id);
        } else {
            self.members.insert(id.clone());
            self.order.push_back(id);
        }

        while self.order.len() > cap {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }
}

impl SeedSampler {
    /// Create a sampler with the given history window size.
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap,
            history: Mutex::new(SeedHistory {
                order: VecDeque::new(),
                members: HashSet::new(),
            }),
        }
    }

    /// Draw a uniformly random active artwork id.
    ///
    /// Returns `None` when the store holds no active records.
    pub fn sample(&self, store: &ArtworkStore) -> Option<ArtworkId> {
        let active = store.active_len();
        if active == 0 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let mut history = self.history.lock();

        // History exclusion needs spare ids to resample from.
        let exclude_recent = self.history_cap > 0 && active > self.history_cap;

        let mut pick = store.nth_active(rng.gen_range(0..active))?;
        if exclude_recent {
            let max_attempts = (self.history_cap * 4).max(32);
            for _ in 0..max_attempts {
                if !history.members.contains(&pick) {
                    break;
                }
                pick = store.nth_active(rng.gen_range(0..active))?;
            }
        }

        history.record(pick.clone(), self.history_cap);
        Some(pick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_store::TagSet;
    use muse_vector::Embedding;

    fn store_with(n: usize) -> ArtworkStore {
        let store = ArtworkStore::new(2);
        for i in 0..n {
            let angle = i as f32 + 0.5;
            let embedding = Embedding::normalized(vec![angle.cos(), angle.sin()]).unwrap();
            store
                .put(format!("met/{i}"), embedding, TagSet::default())
                .unwrap();
        }
        store
    }

    #[test]
    fn test_empty_store_yields_none() {
        let sampler = SeedSampler::new(5);
        let store = ArtworkStore::new(2);
        assert!(sampler.sample(&store).is_none());
    }

    #[test]
    fn test_no_repeat_within_history_window() {
        let sampler = SeedSampler::new(5);
        let store = store_with(10);

        let seeds: Vec<ArtworkId> = (0..1000)
            .map(|_| sampler.sample(&store).unwrap())
            .collect();

        for window in seeds.windows(5) {
            let unique: HashSet<&ArtworkId> = window.iter().collect();
            assert_eq!(unique.len(), window.len(), "repeat inside {:?}", window);
        }
    }

    #[test]
    fn test_all_active_ids_get_sampled() {
        let sampler = SeedSampler::new(5);
        let store = store_with(10);

        let mut seen: HashSet<ArtworkId> = HashSet::new();
        for _ in 0..500 {
            seen.insert(sampler.sample(&store).unwrap());
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_small_collection_disables_exclusion() {
        // Two active ids with a window of 5: exclusion must yield rather
        // than spin.
        let sampler = SeedSampler::new(5);
        let store = store_with(2);

        for _ in 0..100 {
            assert!(sampler.sample(&store).is_some());
        }
    }

    #[test]
    fn test_deleted_ids_never_sampled() {
        let sampler = SeedSampler::new(2);
        let store = store_with(6);
        store.remove(&"met/3".into());

        for _ in 0..300 {
            let seed = sampler.sample(&store).unwrap();
            assert_ne!(seed.as_str(), "met/3");
        }
    }
}
