//! Sequential and shuffled navigation over playlist indices.
//!
//! With shuffle on, the pending pool holds every index except the current
//! one.  Moving forward pushes the current index onto the front and pops the
//! back; moving backward does the mirror, so a backward step exactly undoes
//! the preceding forward step.

use player_proto::protocol::Direction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub struct Navigation {
    current: Option<usize>,
    shuffle: bool,
    pending: VecDeque<usize>,
    rng: StdRng,
}

impl Default for Navigation {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigation {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic shuffle order, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            current: None,
            shuffle: false,
            pending: VecDeque::new(),
            rng,
        }
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current(&mut self, index: Option<usize>) {
        self.current = index;
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn pending(&self) -> &VecDeque<usize> {
        &self.pending
    }

    pub fn set_shuffle(&mut self, enabled: bool, len: usize) {
        self.shuffle = enabled;
        self.reseed(len);
    }

    /// Forget the current index and the pool.
    pub fn clear(&mut self) {
        self.current = None;
        self.pending.clear();
    }

    /// Rebuild the pool as a uniform random permutation of `0..len` minus
    /// the current index.  Each pick removes a random element from a working
    /// copy.  Does nothing but empty the pool while shuffle is off.
    pub fn reseed(&mut self, len: usize) {
        self.pending.clear();
        if !self.shuffle {
            return;
        }

        let mut working: Vec<usize> = (0..len).filter(|i| Some(*i) != self.current).collect();
        while !working.is_empty() {
            let pick = self.rng.gen_range(0..working.len());
            self.pending.push_back(working.remove(pick));
        }
    }

    /// Make `index` current directly.  With shuffle on, `index` takes the
    /// place in the pool of the previously current entry so the pool still
    /// covers everything but the current index.
    pub fn jump(&mut self, index: usize) {
        if let Some(slot) = self.pending.iter().position(|i| *i == index) {
            match self.current {
                Some(previous) => self.pending[slot] = previous,
                None => {
                    self.pending.remove(slot);
                }
            }
        }
        self.current = Some(index);
    }

    /// Step to the next index for a playlist of `len` entries and make it
    /// current.  Returns `None` for an empty playlist.
    pub fn advance(&mut self, direction: Direction, len: usize) -> Option<usize> {
        if len == 0 {
            self.current = None;
            return None;
        }

        let next = if self.shuffle {
            self.shuffled_step(direction)
        } else {
            None
        };

        let next = match next {
            Some(index) if index < len => index,
            Some(_) | None => {
                let from = self.current.map(|c| c as isize).unwrap_or(-1);
                wrap(from + direction.step(), len)
            }
        };

        self.current = Some(next);
        Some(next)
    }

    fn shuffled_step(&mut self, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward => {
                if let Some(current) = self.current {
                    self.pending.push_front(current);
                }
                self.pending.pop_back()
            }
            Direction::Backward => {
                if let Some(current) = self.current {
                    self.pending.push_back(current);
                }
                self.pending.pop_front()
            }
        }
    }
}

fn wrap(index: isize, len: usize) -> usize {
    if index >= len as isize {
        0
    } else if index < 0 {
        len - 1
    } else {
        index as usize
    }
}
