//! Feature & hash pipeline.
//!
//! Raw template → [`extract`] → [`PrivacyTransform`] → [`FingerprintHasher`].
//! Nothing above this module ever sees raw biometric bytes.

pub mod extract;
pub mod features;
pub mod fingerprint;
pub mod privacy;

pub use extract::{extract, extract_named, Landmark, Modality, RawTemplate, PRIVACY_KEY};
pub use features::{FeatureSet, FeatureValue};
pub use fingerprint::{truncate_fingerprint, Fingerprint, FingerprintHasher, FINGERPRINT_PREFIX_LEN};
pub use privacy::{PrivacyParams, PrivacyTransform};
