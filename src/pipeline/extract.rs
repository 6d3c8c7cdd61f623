//! Modality-specific feature extraction
//!
//! The capture layer hands over one of three template shapes. Extraction
//! validates the shape against the declared modality, enforces the size
//! limits, and reduces the template to summary features. Every extracted
//! set carries a `privacy` sub-object with the modality's noise level and
//! quantization depth, consumed (and removed) by the privacy transform.

use super::features::FeatureSet;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key of the privacy parameter sub-object.
pub const PRIVACY_KEY: &str = "privacy";

const MIN_LANDMARKS: usize = 3;
const MAX_LANDMARKS: usize = 1_000;
const MAX_VOICE_BYTES: usize = 1_048_576;
const VOICE_BANDS: usize = 8;
const MAX_TIMING_ARRAYS: usize = 32;
const MAX_TIMING_VALUES: usize = 10_000;
const MAX_TIMING_NAME_LEN: usize = 64;

/// Supported biometric modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Voice,
    Behavioral,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Voice => "voice",
            Modality::Behavioral => "behavioral",
        }
    }

    /// Additive noise bound applied to every numeric feature.
    pub fn noise_level(&self) -> f64 {
        match self {
            Modality::Face => 0.01,
            Modality::Voice => 0.02,
            Modality::Behavioral => 0.05,
        }
    }

    /// Quantization depth in bits.
    pub fn quantization_bits(&self) -> u32 {
        match self {
            Modality::Face => 8,
            Modality::Voice => 8,
            Modality::Behavioral => 6,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(Modality::Face),
            "voice" => Ok(Modality::Voice),
            "behavioral" => Ok(Modality::Behavioral),
            other => Err(ValidationError::UnsupportedModality(other.to_string())),
        }
    }
}

/// A single facial landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }
}

/// Template as handed over by the capture layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum RawTemplate {
    /// Landmark points for face
    Face { landmarks: Vec<Landmark> },
    /// Unsigned 8-bit PCM payload for voice
    Voice { samples: Vec<u8> },
    /// Named timing arrays (milliseconds) for behavioral
    Behavioral { timings: BTreeMap<String, Vec<f64>> },
}

impl RawTemplate {
    /// Modality this template shape belongs to.
    pub fn shape(&self) -> Modality {
        match self {
            RawTemplate::Face { .. } => Modality::Face,
            RawTemplate::Voice { .. } => Modality::Voice,
            RawTemplate::Behavioral { .. } => Modality::Behavioral,
        }
    }
}

/// Extract features for `modality` from `template`.
pub fn extract(template: &RawTemplate, modality: Modality) -> Result<FeatureSet, ValidationError> {
    if template.shape() != modality {
        return Err(ValidationError::TemplateMismatch {
            expected: modality.to_string(),
            actual: template.shape().to_string(),
        });
    }

    let mut features = match template {
        RawTemplate::Face { landmarks } => extract_face(landmarks)?,
        RawTemplate::Voice { samples } => extract_voice(samples)?,
        RawTemplate::Behavioral { timings } => extract_behavioral(timings)?,
    };

    features.insert(
        PRIVACY_KEY,
        FeatureSet::new()
            .with("noise_level", modality.noise_level())
            .with("quantization_bits", f64::from(modality.quantization_bits())),
    );
    Ok(features)
}

/// Extract features for a modality named by the capture layer.
pub fn extract_named(template: &RawTemplate, modality: &str) -> Result<FeatureSet, ValidationError> {
    extract(template, modality.parse()?)
}

fn extract_face(landmarks: &[Landmark]) -> Result<FeatureSet, ValidationError> {
    if landmarks.len() < MIN_LANDMARKS {
        return Err(ValidationError::InvalidTemplate(format!(
            "face template needs at least {} landmarks, got {}",
            MIN_LANDMARKS,
            landmarks.len()
        )));
    }
    if landmarks.len() > MAX_LANDMARKS {
        return Err(ValidationError::TemplateTooLarge(format!(
            "{} landmarks exceeds limit of {}",
            landmarks.len(),
            MAX_LANDMARKS
        )));
    }
    let all_finite = landmarks
        .iter()
        .all(|p| p.x.is_finite() && p.y.is_finite() && p.z.map_or(true, f64::is_finite));
    if !all_finite {
        return Err(ValidationError::InvalidTemplate(
            "landmark coordinates must be finite".to_string(),
        ));
    }

    let n = landmarks.len() as f64;
    let (min_x, max_x) = bounds(landmarks.iter().map(|p| p.x));
    let (min_y, max_y) = bounds(landmarks.iter().map(|p| p.y));
    let width = max_x - min_x;
    let height = max_y - min_y;
    let diagonal = (width * width + height * height).sqrt();
    let scale = if diagonal > 0.0 { diagonal } else { 1.0 };

    let mut centroid = FeatureSet::new()
        .with("x", landmarks.iter().map(|p| p.x).sum::<f64>() / n)
        .with("y", landmarks.iter().map(|p| p.y).sum::<f64>() / n);
    let depths: Vec<f64> = landmarks.iter().filter_map(|p| p.z).collect();
    if !depths.is_empty() {
        centroid.insert("z", depths.iter().sum::<f64>() / depths.len() as f64);
    }

    let mut geometry = FeatureSet::new();
    for (i, pair) in landmarks.windows(2).enumerate() {
        let dx = pair[1].x - pair[0].x;
        let dy = pair[1].y - pair[0].y;
        let dz = pair[1].z.unwrap_or(0.0) - pair[0].z.unwrap_or(0.0);
        geometry.insert(
            format!("d{:03}", i),
            (dx * dx + dy * dy + dz * dz).sqrt() / scale,
        );
    }

    Ok(FeatureSet::new()
        .with("landmark_count", landmarks.len())
        .with("centroid", centroid)
        .with(
            "bounding_box",
            FeatureSet::new().with("width", width).with("height", height),
        )
        .with("geometry", geometry))
}

fn extract_voice(samples: &[u8]) -> Result<FeatureSet, ValidationError> {
    if samples.is_empty() {
        return Err(ValidationError::InvalidTemplate(
            "voice template is empty".to_string(),
        ));
    }
    if samples.len() > MAX_VOICE_BYTES {
        return Err(ValidationError::TemplateTooLarge(format!(
            "{} voice bytes exceeds limit of {}",
            samples.len(),
            MAX_VOICE_BYTES
        )));
    }

    let normalized: Vec<f64> = samples.iter().map(|&b| (f64::from(b) - 128.0) / 128.0).collect();
    let n = normalized.len() as f64;

    let mean_amplitude = normalized.iter().map(|s| s.abs()).sum::<f64>() / n;
    let rms_energy = rms(&normalized);
    let crossings = normalized
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    let zero_crossing_rate = if normalized.len() > 1 {
        crossings as f64 / (n - 1.0)
    } else {
        0.0
    };

    let band_len = normalized.len().div_ceil(VOICE_BANDS);
    let mut bands = FeatureSet::new();
    for band in 0..VOICE_BANDS {
        let start = (band * band_len).min(normalized.len());
        let end = ((band + 1) * band_len).min(normalized.len());
        bands.insert(format!("b{}", band), rms(&normalized[start..end]));
    }

    Ok(FeatureSet::new()
        .with("sample_count", samples.len())
        .with("mean_amplitude", mean_amplitude)
        .with("rms_energy", rms_energy)
        .with("zero_crossing_rate", zero_crossing_rate)
        .with("bands", bands))
}

fn extract_behavioral(timings: &BTreeMap<String, Vec<f64>>) -> Result<FeatureSet, ValidationError> {
    if timings.is_empty() {
        return Err(ValidationError::InvalidTemplate(
            "behavioral template has no timing arrays".to_string(),
        ));
    }
    if timings.len() > MAX_TIMING_ARRAYS {
        return Err(ValidationError::TemplateTooLarge(format!(
            "{} timing arrays exceeds limit of {}",
            timings.len(),
            MAX_TIMING_ARRAYS
        )));
    }

    let mut per_array = FeatureSet::new();
    for (name, values) in timings {
        if name.is_empty()
            || name.chars().count() > MAX_TIMING_NAME_LEN
            || name.chars().any(char::is_control)
        {
            return Err(ValidationError::InvalidTemplate(format!(
                "invalid timing array name {:?}",
                name
            )));
        }
        if values.is_empty() {
            return Err(ValidationError::InvalidTemplate(format!(
                "timing array {:?} is empty",
                name
            )));
        }
        if values.len() > MAX_TIMING_VALUES {
            return Err(ValidationError::TemplateTooLarge(format!(
                "timing array {:?} has {} values, limit is {}",
                name,
                values.len(),
                MAX_TIMING_VALUES
            )));
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(ValidationError::InvalidTemplate(format!(
                "timing array {:?} contains non-finite values",
                name
            )));
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let (min, max) = bounds(values.iter().copied());

        per_array.insert(
            name.clone(),
            FeatureSet::new()
                .with("count", values.len())
                .with("mean", mean)
                .with("std_dev", variance.sqrt())
                .with("min", min)
                .with("max", max),
        );
    }

    Ok(FeatureSet::new()
        .with("array_count", timings.len())
        .with("timings", per_array))
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}
