// src/service/mod.rs — Session service: the operations callers actually use
//
// Every job follows the same discipline: look up and validate, run
// request-level checks, acquire the session guard, run the compute work on
// the worker pool, record the outcome, commit the result only if the session
// is still alive, then release.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::compute::{Artifact, ComputeBackend, ComputeError, Dataset, Prediction};
use crate::infra::config::{Config, SessionPolicy};
use crate::infra::errors::SessionError;
use crate::parse::parse_upload;
use crate::session::guard::{ExecutionGuard, JobGuard};
use crate::session::reaper::Reaper;
use crate::session::store::SessionStore;
use crate::session::{
    InvalidationReason, JobOutput, Session, SessionData, SessionId, SessionKind, SessionSummary,
};
use crate::sweep::{SweepExecutor, WorkerPool};

/// What the client learns about its upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UploadMetadata {
    Tabular {
        /// Feature column names, in order. One input value per question.
        questions: Vec<String>,
        labels: Vec<String>,
        rows: usize,
    },
    Image {
        ready: bool,
        width: u32,
        height: u32,
    },
}

impl UploadMetadata {
    fn describe(data: &SessionData) -> Self {
        match data {
            SessionData::Tabular { dataset, .. } => UploadMetadata::Tabular {
                questions: dataset.features.clone(),
                labels: dataset.distinct_labels(),
                rows: dataset.len(),
            },
            SessionData::Image { image } => UploadMetadata::Image {
                ready: true,
                width: image.width(),
                height: image.height(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub session_id: SessionId,
    pub kind: String,
    pub metadata: UploadMetadata,
}

pub struct SessionService {
    store: Arc<SessionStore>,
    guard: ExecutionGuard,
    sweeper: Arc<SweepExecutor>,
    backend: Arc<dyn ComputeBackend>,
    pool: WorkerPool,
    policy: SessionPolicy,
}

impl SessionService {
    /// Build the service and its process-wide worker pool from config.
    pub fn new(config: &Config, backend: Arc<dyn ComputeBackend>) -> Self {
        let pool = WorkerPool::new(config.sweep.max_workers);
        let sweeper = SweepExecutor::new(Arc::clone(&backend), pool.clone(), &config.sweep);
        Self::with_parts(
            Arc::new(SessionStore::new()),
            config.sessions.policy(),
            sweeper,
            backend,
            pool,
        )
    }

    pub fn with_parts(
        store: Arc<SessionStore>,
        policy: SessionPolicy,
        sweeper: SweepExecutor,
        backend: Arc<dyn ComputeBackend>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            guard: ExecutionGuard::from_policy(&policy),
            sweeper: Arc::new(sweeper),
            backend,
            pool,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn live_sessions(&self) -> usize {
        self.store.len()
    }

    /// Spawn the background reaper over this service's store.
    pub fn start_reaper(&self) -> Reaper {
        Reaper::start(Arc::clone(&self.store), self.policy)
    }

    /// Parse an upload and open a session for it.
    pub async fn upload(&self, kind: SessionKind, bytes: Vec<u8>) -> Result<UploadReceipt, SessionError> {
        let size = bytes.len();
        let (data, payload) = self
            .pool
            .run(move || Ok(parse_upload(kind, &bytes).map(|data| (data, bytes))))
            .await??;

        let metadata = UploadMetadata::describe(&data);
        let session = self.store.create(data, payload)?;
        tracing::info!(session_id = %session.id(), %kind, bytes = size, "session created");

        Ok(UploadReceipt {
            session_id: session.id(),
            kind: kind.to_string(),
            metadata,
        })
    }

    /// Classify one input row. The model is trained on first use and kept
    /// for the life of the session.
    pub async fn predict(&self, id: &SessionId, input: &[f64]) -> Result<Prediction, SessionError> {
        let session = self.get_valid(id)?;
        let dataset = match session.data() {
            SessionData::Tabular { dataset, .. } => Arc::clone(dataset),
            SessionData::Image { .. } => return Err(wrong_kind("predict", &session)),
        };
        if input.len() != dataset.feature_count() {
            return Err(SessionError::InvalidInput(format!(
                "expected {} values, got {}",
                dataset.feature_count(),
                input.len()
            )));
        }
        if input.iter().any(|v| !v.is_finite()) {
            return Err(SessionError::InvalidInput("input values must be finite".into()));
        }

        let job = self.guard.acquire(&session).await?;
        let backend = Arc::clone(&self.backend);
        let pool = self.pool.clone();
        let input = input.to_vec();
        let work = async move { run_prediction(&backend, &pool, &session, dataset, input).await };
        let prediction = self
            .run_guarded(job, work, |p: &Prediction| JobOutput::Prediction(p.clone()))
            .await?;
        tracing::info!(session_id = %id, decision = ?prediction, "prediction served");
        Ok(prediction)
    }

    /// Cluster the session's image for every k in 2..=n.
    pub async fn process_sweep(&self, id: &SessionId, n: i64) -> Result<Vec<Artifact>, SessionError> {
        let session = self.get_valid(id)?;
        let image = match session.data() {
            SessionData::Image { image } => Arc::clone(image),
            SessionData::Tabular { .. } => return Err(wrong_kind("sweep", &session)),
        };
        self.sweeper.validate(n)?;

        let job = self.guard.acquire(&session).await?;
        let sweeper = Arc::clone(&self.sweeper);
        let work = async move { sweeper.run(image, n).await };
        self.run_guarded(job, work, |artifacts: &Vec<Artifact>| {
            JobOutput::Sweep(artifacts.clone())
        })
        .await
    }

    /// Invalidate and retire. Unknown or already-terminal ids are fine.
    pub fn cleanup(&self, id: &SessionId) -> bool {
        let Ok(session) = self.store.get(id) else {
            return false;
        };
        let changed = session.invalidate(InvalidationReason::Cleanup);
        self.store.retire(&session);
        changed
    }

    /// Current state of a session. Does not refresh its idle timer.
    pub fn describe(&self, id: &SessionId) -> Result<SessionSummary, SessionError> {
        let session = self.store.get(id)?;
        let now = Utc::now();
        if !session.is_valid_at(now, &self.policy) {
            session.expire_if_stale(now, &self.policy);
            let err = session
                .terminal_error()
                .unwrap_or(SessionError::Expired(*id));
            self.store.retire(&session);
            return Err(err);
        }
        Ok(session.summary())
    }

    /// Lookup plus freshness check. A session found stale is expired and
    /// retired here, so callers never see it again.
    fn get_valid(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let session = self.store.get(id)?;
        if let Err(e) = session.check_access(Utc::now(), &self.policy) {
            if session.status().is_terminal() {
                self.store.retire(&session);
            }
            return Err(e);
        }
        Ok(session)
    }

    /// Run `work` on its own task, which owns the guard. Dropping the
    /// caller's future does not release the session while compute is still
    /// running; the task releases it when the work ends.
    async fn run_guarded<T, W, F>(
        &self,
        job: JobGuard,
        work: W,
        to_output: F,
    ) -> Result<T, SessionError>
    where
        T: Send + 'static,
        W: Future<Output = Result<T, SessionError>> + Send + 'static,
        F: FnOnce(&T) -> JobOutput + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let id = job.session().id();
        let task = tokio::spawn(async move {
            let result = work.await;
            finish(&store, job, result, to_output)
        });
        task.await.map_err(|e| {
            tracing::error!(session_id = %id, "job task failed: {e}");
            SessionError::Backend(ComputeError::Worker(e.to_string()))
        })?
    }
}

async fn run_prediction(
    backend: &Arc<dyn ComputeBackend>,
    pool: &WorkerPool,
    session: &Session,
    dataset: Arc<Dataset>,
    input: Vec<f64>,
) -> Result<Prediction, SessionError> {
    let model = match session.cached_model() {
        Some(model) => model,
        None => {
            let trainer = Arc::clone(backend);
            let trained = pool.run(move || trainer.train(&dataset)).await?;
            tracing::debug!(session_id = %session.id(), "model trained");
            session.cache_model(trained)
        }
    };
    let backend = Arc::clone(backend);
    Ok(pool.run(move || backend.predict(&model, &input)).await?)
}

/// Record the outcome, commit on success, check the store, release.
fn finish<T>(
    store: &SessionStore,
    mut job: JobGuard,
    result: Result<T, SessionError>,
    to_output: impl FnOnce(&T) -> JobOutput,
) -> Result<T, SessionError> {
    let session = Arc::clone(job.session());
    let id = session.id();

    // Only backend failures are charged to the retry budget.
    match &result {
        Ok(_) => {
            job.record_outcome(true);
        }
        Err(SessionError::Backend(e)) => {
            tracing::warn!(session_id = %id, "job failed: {e}");
            job.record_outcome(false);
        }
        Err(_) => {}
    }

    let committed = match result {
        Ok(value) => session
            .commit_result(to_output(&value), Utc::now())
            .map(|()| value),
        Err(e) => Err(e),
    };

    if !store.knows(&id) && !session.status().is_terminal() {
        tracing::error!(session_id = %id, "session vanished from the store during a job");
        job.release();
        return Err(SessionError::Invariant(format!(
            "session {id} missing from the store after a job"
        )));
    }

    job.release();
    if session.status().is_terminal() {
        store.retire(&session);
    }
    committed
}

fn wrong_kind(operation: &'static str, session: &Session) -> SessionError {
    SessionError::WrongKind {
        operation,
        kind: session.kind().to_string(),
    }
}
