use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("{0} must be at least one frame")]
    ZeroFrameThreshold(&'static str),
    #[error("match distance threshold must be finite and in (0, 2], got {0}")]
    InvalidMatchThreshold(f32),
}

/// Alerting thresholds and gates.
///
/// Frame thresholds count *consecutive* frames of one condition; any frame
/// with a different outcome restarts the streak. The cooldown bounds how
/// often one alert kind can re-fire once its condition persists.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Consecutive faceless frames before a no-face alert.
    pub face_missing_threshold: u32,
    /// Consecutive multi-face frames before a multiple-faces alert.
    pub multi_face_threshold: u32,
    /// Consecutive mismatching frames before an identity alert.
    pub identity_mismatch_threshold: u32,
    /// Minimum gap between two alerts of the same kind.
    pub alert_cooldown: Duration,
    /// Cosine distance above which a single detected face is treated as
    /// not being the registered user.
    pub match_distance_threshold: f32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            face_missing_threshold: 5,
            multi_face_threshold: 5,
            identity_mismatch_threshold: 3,
            alert_cooldown: Duration::from_secs(10),
            match_distance_threshold: 0.4,
        }
    }
}

impl Policy {
    /// Reject configurations that would misbehave silently. A zero frame
    /// threshold would fire on every frame; a match threshold outside
    /// (0, 2] cannot be crossed meaningfully by a cosine distance.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.face_missing_threshold == 0 {
            return Err(PolicyError::ZeroFrameThreshold("face_missing_threshold"));
        }
        if self.multi_face_threshold == 0 {
            return Err(PolicyError::ZeroFrameThreshold("multi_face_threshold"));
        }
        if self.identity_mismatch_threshold == 0 {
            return Err(PolicyError::ZeroFrameThreshold(
                "identity_mismatch_threshold",
            ));
        }
        if !self.match_distance_threshold.is_finite()
            || self.match_distance_threshold <= 0.0
            || self.match_distance_threshold > 2.0
        {
            return Err(PolicyError::InvalidMatchThreshold(
                self.match_distance_threshold,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Policy::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_frame_threshold() {
        let policy = Policy {
            identity_mismatch_threshold: 0,
            ..Policy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::ZeroFrameThreshold("identity_mismatch_threshold"))
        ));
    }

    #[test]
    fn test_rejects_nan_match_threshold() {
        let policy = Policy {
            match_distance_threshold: f32::NAN,
            ..Policy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::InvalidMatchThreshold(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_match_threshold() {
        for bad in [0.0, -0.4, 2.5] {
            let policy = Policy {
                match_distance_threshold: bad,
                ..Policy::default()
            };
            assert!(policy.validate().is_err(), "threshold {bad} should fail");
        }
    }
}
