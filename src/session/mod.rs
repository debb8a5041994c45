// src/session/mod.rs — Session entity and validity state machine
//
// A session owns one parsed upload. Its identity, payload and creation time
// never change; everything mutable sits behind a per-session mutex so that a
// long job on one session never blocks lookups of another.
//
//   Active ──acquire──▶ Busy ──release──▶ Active
//   Active ──ttl──────▶ Expired            (terminal)
//   Active|Busy ──────▶ Invalidated        (terminal: cleanup or retry budget)

pub mod guard;
pub mod reaper;
pub mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::compute::{Artifact, Dataset, Model, Prediction};
use crate::infra::config::SessionPolicy;
use crate::infra::errors::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// What a tabular upload is used for. Decides where the label column is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabularUse {
    /// Label is the last column.
    Classifier,
    /// Label is the column named like an answer (see `parse::tabular`).
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Tabular(TabularUse),
    Image,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Tabular(TabularUse::Classifier) => "classifier",
            SessionKind::Tabular(TabularUse::Expert) => "expert",
            SessionKind::Image => "image",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classifier" | "tabular" => Ok(SessionKind::Tabular(TabularUse::Classifier)),
            "expert" => Ok(SessionKind::Tabular(TabularUse::Expert)),
            "image" | "raw" => Ok(SessionKind::Image),
            other => Err(format!(
                "unknown session kind '{other}' (expected classifier, expert or image)"
            )),
        }
    }
}

/// Parsed form of the upload, one variant per kind.
#[derive(Debug, Clone)]
pub enum SessionData {
    Tabular {
        use_case: TabularUse,
        dataset: Arc<Dataset>,
    },
    Image {
        image: Arc<RgbImage>,
    },
}

impl SessionData {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionData::Tabular { use_case, .. } => SessionKind::Tabular(*use_case),
            SessionData::Image { .. } => SessionKind::Image,
        }
    }

    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        match self {
            SessionData::Tabular { dataset, .. } => Some(dataset),
            SessionData::Image { .. } => None,
        }
    }

    pub fn image(&self) -> Option<&Arc<RgbImage>> {
        match self {
            SessionData::Image { image } => Some(image),
            SessionData::Tabular { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Busy,
    Expired,
    Invalidated,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Invalidated)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Busy) | (Busy, Active) | (Active, Expired) | (Active, Invalidated) | (Busy, Invalidated)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum InvalidationReason {
    RetryBudget { failures: u32 },
    Cleanup,
}

/// The error a caller gets for a session in a terminal state.
pub(crate) fn terminal_error(
    id: SessionId,
    status: SessionStatus,
    reason: Option<InvalidationReason>,
) -> SessionError {
    match (status, reason) {
        (SessionStatus::Invalidated, Some(InvalidationReason::RetryBudget { failures })) => {
            SessionError::TooManyRetries {
                id,
                budget: failures,
            }
        }
        (SessionStatus::Invalidated, _) => SessionError::Invalidated(id),
        _ => SessionError::Expired(id),
    }
}

/// Result of the most recent successful job.
#[derive(Debug, Clone)]
pub enum JobOutput {
    Prediction(Prediction),
    Sweep(Vec<Artifact>),
}

impl JobOutput {
    pub fn len(&self) -> usize {
        match self {
            JobOutput::Prediction(_) => 1,
            JobOutput::Sweep(artifacts) => artifacts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to the retry counter after a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Reset,
    Counted { failures: u32 },
    Exhausted { failures: u32 },
    /// The session was already terminal; nothing was recorded.
    Ignored,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    invalidation: Option<InvalidationReason>,
    last_accessed_at: DateTime<Utc>,
    retry_count: u32,
    cached_model: Option<Model>,
    last_result: Option<Arc<JobOutput>>,
}

impl SessionState {
    fn transition(&mut self, id: SessionId, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            tracing::error!(
                session_id = %id,
                from = ?self.status,
                to = ?next,
                "illegal session status transition"
            );
            return Err(SessionError::Invariant(format!(
                "session {id}: {:?} -> {next:?} is not a legal transition",
                self.status
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.cached_model = None;
            self.last_result = None;
        }
        Ok(())
    }

    fn is_fresh(&self, created_at: DateTime<Utc>, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        now - self.last_accessed_at < to_delta(policy.idle_ttl)
            && now - created_at < to_delta(policy.absolute_ttl)
    }
}

fn to_delta(d: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub kind: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub model_cached: bool,
    pub last_result_len: usize,
}

pub struct Session {
    id: SessionId,
    payload: Vec<u8>,
    data: SessionData,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    /// One permit: held by whoever runs a job on this session.
    gate: Arc<Semaphore>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("payload_bytes", &self.payload.len())
            .field("created_at", &self.created_at)
            .field("status", &self.status())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(data: SessionData, payload: Vec<u8>) -> Self {
        Self::with_id(SessionId::new(), data, payload, Utc::now())
    }

    pub(crate) fn with_id(
        id: SessionId,
        data: SessionData,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            data,
            created_at,
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                invalidation: None,
                last_accessed_at: created_at,
                retry_count: 0,
                cached_model: None,
                last_result: None,
            }),
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.data.kind()
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        self.lock_state().invalidation
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.lock_state().last_accessed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.lock_state().retry_count
    }

    pub fn cached_model(&self) -> Option<Model> {
        self.lock_state().cached_model.clone()
    }

    pub fn last_result(&self) -> Option<Arc<JobOutput>> {
        self.lock_state().last_result.clone()
    }

    /// Active or Busy, and within both the idle and the absolute TTL.
    pub fn is_valid_at(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        let state = self.lock_state();
        !state.status.is_terminal() && state.is_fresh(self.created_at, now, policy)
    }

    pub(crate) fn terminal_error(&self) -> Option<SessionError> {
        let state = self.lock_state();
        state
            .status
            .is_terminal()
            .then(|| terminal_error(self.id, state.status, state.invalidation))
    }

    /// Validate and refresh the idle timer in one step. A stale Active
    /// session is expired on the spot; a stale Busy one is refused but left
    /// for its job to release.
    pub(crate) fn check_access(
        &self,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return Err(terminal_error(self.id, state.status, state.invalidation));
        }
        if !state.is_fresh(self.created_at, now, policy) {
            if state.status == SessionStatus::Active {
                state.transition(self.id, SessionStatus::Expired)?;
                drop(state);
                self.gate.close();
                tracing::debug!(session_id = %self.id, "session expired on access");
            }
            return Err(SessionError::Expired(self.id));
        }
        state.last_accessed_at = now;
        Ok(())
    }

    /// Reaper entry point. Returns true if this call expired the session.
    pub(crate) fn expire_if_stale(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        let mut state = self.lock_state();
        if state.status != SessionStatus::Active || state.is_fresh(self.created_at, now, policy) {
            return false;
        }
        let expired = state.transition(self.id, SessionStatus::Expired).is_ok();
        drop(state);
        if expired {
            self.gate.close();
        }
        expired
    }

    /// Returns true if this call moved the session to Invalidated.
    pub(crate) fn invalidate(&self, reason: InvalidationReason) -> bool {
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return false;
        }
        if state.transition(self.id, SessionStatus::Invalidated).is_err() {
            return false;
        }
        state.invalidation = Some(reason);
        drop(state);
        // Wake anyone queued on the gate; they will see the terminal state.
        self.gate.close();
        tracing::info!(session_id = %self.id, ?reason, "session invalidated");
        true
    }

    pub(crate) fn gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.gate)
    }

    /// Active -> Busy. Caller must hold the gate permit.
    pub(crate) fn begin_job(&self) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return Err(terminal_error(self.id, state.status, state.invalidation));
        }
        state.transition(self.id, SessionStatus::Busy)
    }

    /// Busy -> Active; anything else is left alone. Returns true on transition.
    pub(crate) fn end_job(&self) -> bool {
        let mut state = self.lock_state();
        state.status == SessionStatus::Busy
            && state.transition(self.id, SessionStatus::Active).is_ok()
    }

    pub(crate) fn record_outcome(&self, success: bool, budget: u32) -> RetryOutcome {
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return RetryOutcome::Ignored;
        }
        if success {
            state.retry_count = 0;
            return RetryOutcome::Reset;
        }
        state.retry_count += 1;
        let failures = state.retry_count;
        if failures < budget {
            return RetryOutcome::Counted { failures };
        }
        drop(state);
        self.invalidate(InvalidationReason::RetryBudget { failures });
        RetryOutcome::Exhausted { failures }
    }

    /// Memoise the first trained model; later calls get the original back.
    pub(crate) fn cache_model(&self, model: Model) -> Model {
        let mut state = self.lock_state();
        state.cached_model.get_or_insert(model).clone()
    }

    /// Store a job result, unless the session was invalidated mid-job.
    /// Store a job's output. Finishing a job counts as an access, so a long
    /// job does not leave the session one idle period from expiry.
    pub(crate) fn commit_result(
        &self,
        output: JobOutput,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        if state.status.is_terminal() {
            return Err(terminal_error(self.id, state.status, state.invalidation));
        }
        state.last_result = Some(Arc::new(output));
        state.last_accessed_at = state.last_accessed_at.max(now);
        Ok(())
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.lock_state();
        SessionSummary {
            session_id: self.id,
            kind: self.kind().to_string(),
            status: state.status,
            created_at: self.created_at,
            last_accessed_at: state.last_accessed_at,
            retry_count: state.retry_count,
            model_cached: state.cached_model.is_some(),
            last_result_len: state.last_result.as_ref().map_or(0, |r| r.len()),
        }
    }
}
