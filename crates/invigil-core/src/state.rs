use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::types::{AlertKind, SessionKey};

/// Mutable per-session counters and cooldown stamps.
///
/// Exactly one of the three frame counters accumulates per processed
/// frame; recording any outcome zeroes the streaks of the other
/// conditions, so transient misclassifications never add up across
/// unrelated outcomes.
#[derive(Debug, Default)]
pub struct ProctoringState {
    pub face_missing_frames: u32,
    pub multi_face_frames: u32,
    pub identity_mismatch_frames: u32,
    last_alert: HashMap<AlertKind, Instant>,
}

impl ProctoringState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame with no detectable face.
    pub fn record_face_missing(&mut self) {
        self.face_missing_frames += 1;
        self.multi_face_frames = 0;
        self.identity_mismatch_frames = 0;
    }

    /// Record a frame with more than one face.
    pub fn record_multiple_faces(&mut self) {
        self.multi_face_frames += 1;
        self.face_missing_frames = 0;
        self.identity_mismatch_frames = 0;
    }

    /// Record a frame with exactly one face. The identity counter grows
    /// only while consecutive single-face frames keep mismatching.
    pub fn record_face_present(&mut self, identity_mismatch: bool) {
        self.face_missing_frames = 0;
        self.multi_face_frames = 0;
        if identity_mismatch {
            self.identity_mismatch_frames += 1;
        } else {
            self.identity_mismatch_frames = 0;
        }
    }

    /// Whether an alert of `kind` is outside its cooldown window at `now`.
    pub fn can_trigger_alert(&self, kind: AlertKind, now: Instant, cooldown: Duration) -> bool {
        match self.last_alert.get(&kind) {
            Some(&fired) => now.duration_since(fired) > cooldown,
            None => true,
        }
    }

    /// Stamp the cooldown window for `kind`.
    pub fn record_alert(&mut self, kind: AlertKind, now: Instant) {
        self.last_alert.insert(kind, now);
    }

    /// Current streak length for `kind`.
    pub fn frames_observed(&self, kind: AlertKind) -> u32 {
        match kind {
            AlertKind::NoFace => self.face_missing_frames,
            AlertKind::MultiFace => self.multi_face_frames,
            AlertKind::IdentityMismatch => self.identity_mismatch_frames,
        }
    }

    /// Zero the streak for `kind` only, leaving the others untouched.
    pub fn clear_frames(&mut self, kind: AlertKind) {
        match kind {
            AlertKind::NoFace => self.face_missing_frames = 0,
            AlertKind::MultiFace => self.multi_face_frames = 0,
            AlertKind::IdentityMismatch => self.identity_mismatch_frames = 0,
        }
    }
}

/// Shared map from `(user, exam)` to that session's proctoring state.
///
/// Entries are created lazily on first frame and live for the process
/// lifetime; a restart resets proctoring sensitivity, nothing more. The
/// outer lock covers only entry lookup/insertion. Callers hold the
/// returned per-session lock across the whole classify-update-decide
/// sequence, so two frames for the same session cannot interleave their
/// read-modify-write and double-fire an alert.
///
/// Entries are never evicted; long-running deployments with many distinct
/// sessions should watch the count surfaced via [`SessionStore::len`].
#[derive(Debug, Default)]
pub struct SessionStore {
    states: Mutex<HashMap<SessionKey, Arc<Mutex<ProctoringState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating if absent) the state handle for a session.
    pub fn state(&self, key: SessionKey) -> Arc<Mutex<ProctoringState>> {
        let mut states = self.states.lock().expect("session store lock poisoned");
        states
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ProctoringState::new())))
            .clone()
    }

    /// Number of sessions tracked since startup.
    pub fn len(&self) -> usize {
        self.states.lock().expect("session store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
