use crate::env::Episode;
use std::collections::VecDeque;

/// Whole-episode experience memory held by the trainer.
///
/// Episodes arrive complete from actors, so there is never a partially
/// filled episode in here. When full, the oldest episode is evicted.
#[derive(Debug, Clone)]
pub struct EpisodicMemory {
    episodes: VecDeque<Episode>,
    capacity: usize,
    transitions: u64,
}

impl EpisodicMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            episodes: VecDeque::new(),
            capacity: capacity.max(1),
            transitions: 0,
        }
    }

    pub fn store_episode(&mut self, episode: Episode) {
        if self.episodes.len() == self.capacity {
            if let Some(evicted) = self.episodes.pop_front() {
                self.transitions -= evicted.length();
            }
        }
        self.transitions += episode.length();
        self.episodes.push_back(episode);
    }

    pub fn episodes(&mut self) -> &[Episode] {
        self.episodes.make_contiguous()
    }

    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }

    pub fn num_transitions(&self) -> u64 {
        self.transitions
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.episodes.clear();
        self.transitions = 0;
    }
}
