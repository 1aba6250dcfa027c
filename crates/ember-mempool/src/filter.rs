//! Rolling reject filter.
//!
//! A probabilistic set of recently rejected txids with bounded memory.
//! Three bloom-filter generations rotate as items arrive, so the filter
//! remembers roughly the last `items` insertions. False positives are
//! allowed; an item reported absent was never added within the window.
//!
//! Hash positions are derived from a keyed BLAKE3 stream, re-keyed on
//! every [`reset`](RollingFilter::reset) so peers cannot grind
//! collisions against a long-lived filter state.

use std::f64::consts::LN_2;

/// Number of generations kept. Two full generations are always intact
/// while the third fills.
const GENERATIONS: usize = 3;

/// Rolling probabilistic set of 32-byte items.
pub struct RollingFilter {
    bits: Vec<u64>,
    counts: [usize; GENERATIONS],
    current: usize,
    /// Items per generation before rotation.
    generation_limit: usize,
    /// Bits per generation.
    bits_per_generation: usize,
    /// Hash functions per item.
    hashes: u32,
    tweak: u64,
}

impl RollingFilter {
    /// Create a filter that remembers at least `items` insertions with a
    /// false-positive rate of roughly `rate`.
    pub fn new(items: usize, rate: f64) -> Self {
        let per_generation = items.div_ceil(2).max(1);
        let bits_per_generation =
            (-(per_generation as f64) * rate.ln() / (LN_2 * LN_2)).ceil().max(64.0) as usize;
        let hashes = ((bits_per_generation as f64 / per_generation as f64) * LN_2)
            .round()
            .clamp(1.0, 32.0) as u32;
        let words = GENERATIONS * bits_per_generation.div_ceil(64);

        Self {
            bits: vec![0u64; words],
            counts: [0; GENERATIONS],
            current: 0,
            generation_limit: per_generation,
            bits_per_generation,
            hashes,
            tweak: rand::random(),
        }
    }

    /// Add an item to the current generation, rotating out the oldest
    /// generation when the current one is full.
    pub fn add(&mut self, item: &[u8]) {
        if self.counts[self.current] >= self.generation_limit {
            self.current = (self.current + 1) % GENERATIONS;
            self.clear_generation(self.current);
        }
        let positions: Vec<usize> = self.positions(item).collect();
        for position in positions {
            self.set_bit(self.current, position);
        }
        self.counts[self.current] += 1;
    }

    /// Whether the item may have been added within the rolling window.
    pub fn contains(&self, item: &[u8]) -> bool {
        let positions: Vec<usize> = self.positions(item).collect();
        (0..GENERATIONS).any(|generation| {
            self.counts[generation] > 0
                && positions.iter().all(|&p| self.get_bit(generation, p))
        })
    }

    /// Forget everything and re-key the hash functions.
    pub fn reset(&mut self) {
        self.bits.fill(0);
        self.counts = [0; GENERATIONS];
        self.current = 0;
        self.tweak = rand::random();
    }

    fn positions(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.tweak.to_le_bytes());
        hasher.update(item);
        let mut stream = vec![0u8; self.hashes as usize * 8];
        hasher.finalize_xof().fill(&mut stream);

        let modulus = self.bits_per_generation;
        (0..self.hashes as usize).map(move |i| {
            let bytes: [u8; 8] = stream[i * 8..(i + 1) * 8].try_into().unwrap();
            (u64::from_le_bytes(bytes) % modulus as u64) as usize
        })
    }

    fn word_index(&self, generation: usize, position: usize) -> (usize, u64) {
        let words_per_generation = self.bits_per_generation.div_ceil(64);
        let word = generation * words_per_generation + position / 64;
        (word, 1u64 << (position % 64))
    }

    fn set_bit(&mut self, generation: usize, position: usize) {
        let (word, mask) = self.word_index(generation, position);
        self.bits[word] |= mask;
    }

    fn get_bit(&self, generation: usize, position: usize) -> bool {
        let (word, mask) = self.word_index(generation, position);
        self.bits[word] & mask != 0
    }

    fn clear_generation(&mut self, generation: usize) {
        let words_per_generation = self.bits_per_generation.div_ceil(64);
        let start = generation * words_per_generation;
        self.bits[start..start + words_per_generation].fill(0);
        self.counts[generation] = 0;
    }
}
