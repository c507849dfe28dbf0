//! Stable identifiers and the seeded sampler used for shuffled ordering.
//!
//! Test and group ids are short hex hashes of their names, so they stay the same from
//! one run to the next and can be used in allow-lists and failure stores. The sampler
//! is a 32-bit xorshift generator: given the same seed string it produces the same
//! sequence, which is what makes a seeded shuffle reproducible.

use rand::{Error as RandError, RngCore, SeedableRng};

/// Separator placed between hashed name parts.
const PART_SEPARATOR: &str = "\u{1C}";

/// Hashes name parts into an 8-digit lowercase hex id.
///
/// The parts are joined with an ASCII file separator and folded over their UTF-16 code
/// units with `hash = hash * 31 + unit` in wrapping 32-bit arithmetic.
///
/// # Examples
///
/// ```rust
/// use proctor::hash::generate_hash;
/// let id = generate_hash(&["math", "adds"]);
/// assert_eq!(id.len(), 8);
/// assert_eq!(id, generate_hash(&["math", "adds"]));
/// ```
pub fn generate_hash(parts: &[&str]) -> String {
    let joined = parts.join(PART_SEPARATOR);
    format!("{:08x}", fold_hash(&joined))
}

fn fold_hash(text: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    hash as u32
}

// ============================================================================
// XORSHIFT SAMPLER
// ============================================================================

/// 32-bit xorshift generator (shifts 13, 17, 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    /// Seeds the generator from the hash of a seed string.
    ///
    /// Xorshift needs a non-zero state, so a zero hash falls back to `0xFFFF_FFFF`.
    pub fn from_seed_str(seed: &str) -> Self {
        Self::from_state(fold_hash(seed))
    }

    fn from_state(state: u32) -> Self {
        Self {
            state: if state == 0 { u32::MAX } else { state },
        }
    }

    /// Returns a sample in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }

    /// Returns an index in `0..bound`; `bound` must be non-zero.
    pub fn next_index(&mut self, bound: usize) -> usize {
        ((self.next_unit() * bound as f64).floor() as usize).min(bound.saturating_sub(1))
    }
}

impl RngCore for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        let mut sample = self.state;
        sample ^= sample << 13;
        sample ^= sample >> 17;
        sample ^= sample << 5;
        self.state = sample;
        sample
    }

    fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for XorShift32 {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::from_state(u32::from_le_bytes(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_padded() {
        assert_eq!(generate_hash(&[""]), "00000000");
        // "a" is 97 → 0x61
        assert_eq!(generate_hash(&["a"]), "00000061");
        assert_eq!(generate_hash(&["ab"]), format!("{:08x}", 97 * 31 + 98));
    }

    #[test]
    fn test_hash_distinguishes_part_boundaries() {
        assert_ne!(generate_hash(&["ab", "c"]), generate_hash(&["a", "bc"]));
    }

    #[test]
    fn test_hash_wraps_negative_values() {
        let id = generate_hash(&["a fairly long module name", "with a long test name"]);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sampler_is_reproducible() {
        let mut a = XorShift32::from_seed_str("seed");
        let mut b = XorShift32::from_seed_str("seed");
        let left: Vec<u32> = (0..8).map(|_| a.next_u32()).collect();
        let right: Vec<u32> = (0..8).map(|_| b.next_u32()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_sampler_zero_seed_is_nonzero_state() {
        let mut rng = XorShift32::from_seed([0, 0, 0, 0]);
        assert_ne!(rng.next_u32(), 0);
    }

    #[test]
    fn test_unit_samples_in_range() {
        let mut rng = XorShift32::from_seed_str("range");
        for _ in 0..1000 {
            let sample = rng.next_unit();
            assert!((0.0..1.0).contains(&sample));
        }
        for _ in 0..1000 {
            assert!(rng.next_index(3) < 3);
        }
    }
}
