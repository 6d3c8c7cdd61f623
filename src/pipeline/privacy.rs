//! Privacy transform: bounded noise, then quantization
//!
//! Reads the `privacy` sub-object attached at extraction, strips it, and
//! for every numeric leaf computes
//!
//! ```text
//! v' = round((v + U(-noise, +noise)) * 2^bits) / 2^bits
//! ```
//!
//! With a fixed seed each call draws the same noise sequence, so the same
//! template always transforms (and hashes) the same way.

use super::extract::PRIVACY_KEY;
use super::features::{FeatureSet, FeatureValue};
use crate::error::ValidationError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MIN_BITS: u32 = 1;
const MAX_BITS: u32 = 24;

/// Privacy parameters carried by an extracted feature set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivacyParams {
    pub noise_level: f64,
    pub quantization_bits: u32,
}

impl PrivacyParams {
    fn from_features(set: &FeatureSet) -> Result<Self, ValidationError> {
        let noise_level = match set.get("noise_level") {
            Some(FeatureValue::Number(n)) if n.is_finite() && *n >= 0.0 => *n,
            _ => return Err(ValidationError::MissingPrivacyParameters),
        };
        let quantization_bits = match set.get("quantization_bits") {
            Some(FeatureValue::Number(n)) if n.is_finite() => {
                (n.round() as u32).clamp(MIN_BITS, MAX_BITS)
            }
            _ => return Err(ValidationError::MissingPrivacyParameters),
        };
        Ok(Self {
            noise_level,
            quantization_bits,
        })
    }

    fn levels(&self) -> f64 {
        f64::from(1u32 << self.quantization_bits)
    }
}

/// Applies noise and quantization to extracted features.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyTransform {
    seed: Option<u64>,
}

impl PrivacyTransform {
    /// `seed = None` draws noise from OS entropy on every call.
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    pub fn transform(&self, mut features: FeatureSet) -> Result<FeatureSet, ValidationError> {
        let params = match features.remove(PRIVACY_KEY) {
            Some(FeatureValue::Nested(set)) => PrivacyParams::from_features(&set)?,
            _ => return Err(ValidationError::MissingPrivacyParameters),
        };

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let levels = params.levels();
        let noise = params.noise_level;

        features.map_numbers(&mut |value| {
            let noisy = if noise > 0.0 {
                value + rng.gen_range(-noise..=noise)
            } else {
                value
            };
            (noisy * levels).round() / levels
        });

        Ok(features)
    }
}
