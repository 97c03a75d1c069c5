use crate::digest_sha2;

const SEED_DOMAIN: &[u8] = b"hintdiff-seed-v1";

/// Hash transcript for deriving per-iteration seeds deterministically.
/// A run and its replay build identical transcripts to get the same seeds.
pub struct SeedTranscript {
    state: Vec<u8>,
}

impl SeedTranscript {
    pub fn new(master_seed: u64) -> Self {
        let mut state = SEED_DOMAIN.to_vec();
        state.extend_from_slice(&master_seed.to_le_bytes());
        Self { state }
    }

    /// Absorb raw bytes into the transcript.
    pub fn absorb(&mut self, data: &[u8]) {
        self.state.extend_from_slice(data);
    }

    /// Squeeze a 64-bit seed from the transcript.
    pub fn squeeze_seed(&mut self) -> u64 {
        let hash = digest_sha2(&self.state);
        // Feed the hash back into state so subsequent squeezes differ
        self.state = hash.to_vec();
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash[..8]);
        u64::from_le_bytes(word)
    }
}

/// Seed of iteration `index` in a run started from `master_seed`.
///
/// Independent of how many other iterations were derived, so workers can
/// compute their own seeds in any order.
pub fn iteration_seed(master_seed: u64, index: u64) -> u64 {
    let mut transcript = SeedTranscript::new(master_seed);
    transcript.absorb(&index.to_le_bytes());
    transcript.squeeze_seed()
}
