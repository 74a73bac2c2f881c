//! Deterministic seeding.

use std::fmt;

use rand::{rngs::StdRng, SeedableRng as _};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A seed for deterministic generation.
///
/// Any string can be used as a seed: it is hashed with SHA3-256 to produce the 32-byte RNG seed. The original string
/// is kept for display.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed {
    phrase: String,
    bytes: [u8; 32],
}

impl Seed {
    /// Creates a seed from an arbitrary phrase.
    pub fn new<S: Into<String>>(phrase: S) -> Self {
        let phrase = phrase.into();
        let mut hasher = Sha3_256::new();
        hasher.update(phrase.as_bytes());
        Self {
            bytes: hasher.finalize().into(),
            phrase,
        }
    }

    /// Returns the phrase this seed was created from.
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Creates a deterministic RNG from this seed.
    pub fn rng(&self) -> StdRng {
        StdRng::from_seed(self.bytes)
    }
}

/// Creates the RNG for a job: seeded deterministically when a seed is given, otherwise from the OS.
pub fn job_rng(seed: Option<&Seed>) -> StdRng {
    match seed {
        Some(seed) => seed.rng(),
        None => StdRng::from_os_rng(),
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Seed").field(&self.phrase).finish()
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Seed::new)
    }
}

impl Serialize for Seed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.phrase)
    }
}
