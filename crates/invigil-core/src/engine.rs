//! Alert decision engine.
//!
//! Consumes one classified frame per call, updates the session's counters,
//! and decides whether an alert surfaces this tick. Severity order is
//! fixed: total absence before multiplicity before identity, so at most
//! one alert fires per frame and a frame that could plausibly satisfy
//! several conditions reports the most actionable one.

use std::time::Instant;

use crate::policy::{Policy, PolicyError};
use crate::state::ProctoringState;
use crate::types::{AlertEvent, AlertKind, FrameOutcome};

const NO_FACE_MESSAGE: &str = "Face not detected for an extended period.";
const MULTI_FACE_MESSAGE: &str = "Multiple faces detected.";
const IDENTITY_MISMATCH_MESSAGE: &str = "Face verification failed: identity mismatch.";

pub struct AlertEngine {
    policy: Policy,
}

impl AlertEngine {
    /// Build an engine from a validated policy. Misconfiguration is
    /// rejected here, at startup, rather than misbehaving per frame.
    pub fn new(policy: Policy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Process one classified frame for one session.
    ///
    /// Mutates `state` in place: records the outcome, then walks the alert
    /// kinds in severity order and fires the first whose streak has reached
    /// its threshold with the cooldown elapsed. Firing zeroes only that
    /// kind's counter and stamps its cooldown window.
    pub fn evaluate(
        &self,
        state: &mut ProctoringState,
        outcome: FrameOutcome,
        now: Instant,
    ) -> Option<AlertEvent> {
        match outcome {
            FrameOutcome::NoFace => state.record_face_missing(),
            FrameOutcome::MultiFace => state.record_multiple_faces(),
            FrameOutcome::OneFace { distance } => {
                state.record_face_present(distance > self.policy.match_distance_threshold);
            }
        }

        let checks = [
            (
                AlertKind::NoFace,
                self.policy.face_missing_threshold,
                NO_FACE_MESSAGE,
            ),
            (
                AlertKind::MultiFace,
                self.policy.multi_face_threshold,
                MULTI_FACE_MESSAGE,
            ),
            (
                AlertKind::IdentityMismatch,
                self.policy.identity_mismatch_threshold,
                IDENTITY_MISMATCH_MESSAGE,
            ),
        ];

        for (kind, threshold, message) in checks {
            if state.frames_observed(kind) >= threshold
                && state.can_trigger_alert(kind, now, self.policy.alert_cooldown)
            {
                state.record_alert(kind, now);
                state.clear_frames(kind);
                tracing::info!(
                    kind = %kind,
                    threshold,
                    "proctoring alert fired"
                );
                return Some(AlertEvent {
                    kind,
                    message,
                    fired_at: now,
                });
            }
        }

        None
    }
}
