//! Biometric matching seam.
//!
//! Matching internals are the device's business. The verifier only asks for
//! a similarity in `[0, 1]` between an enrolled template and a fresh sample.

use crate::crypto::hash::blake3_hash;
use crate::identity::store::BiometricTemplate;

pub trait BiometricMatcher: Send + Sync {
    /// Similarity of `sample` to `template`, `0.0` (no match) to `1.0`.
    fn score(&self, template: &BiometricTemplate, sample: &[u8]) -> f64;
}

impl<F> BiometricMatcher for F
where
    F: Fn(&BiometricTemplate, &[u8]) -> f64 + Send + Sync,
{
    fn score(&self, template: &BiometricTemplate, sample: &[u8]) -> f64 {
        self(template, sample)
    }
}

/// Exact matching: a sample scores 1.0 when its BLAKE3 equals the
/// template's recorded hash. Good enough for tokens and tests, useless for
/// real sensors.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateHashMatcher;

impl BiometricMatcher for TemplateHashMatcher {
    fn score(&self, template: &BiometricTemplate, sample: &[u8]) -> f64 {
        let hash = hex::encode(blake3_hash(sample));
        if hash.eq_ignore_ascii_case(&template.template_hash) {
            1.0
        } else {
            0.0
        }
    }
}

/// Pin a matcher score into `[0, 1]`. NaN counts as no match.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
