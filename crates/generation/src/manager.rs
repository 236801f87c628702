//! Generation Session Manager
//!
//! Supervises at most one non-terminal generation per session identifier.
//! Every exit path ends in a terminal status; every non-success exit removes
//! the session's artifacts. Cleanup failures are logged and never mask the
//! error that caused them.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use specflow_config::GenerationConfig;
use specflow_core::{FileNode, SessionStatus, Specification};

use crate::artifacts::ArtifactStore;
use crate::backend::{GenerationBackend, GenerationCallbacks, GenerationObserver, GenerationRequest};
use crate::error::GenerationError;
use crate::session::{GenerationSession, SessionSnapshot};

/// How a generation run ended
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Ready {
        artifact_path: String,
        preview_url: Option<String>,
        duration: Duration,
    },
    Failed {
        error: GenerationError,
        duration: Duration,
    },
    Cancelled {
        duration: Duration,
    },
}

impl GenerationOutcome {
    pub fn duration(&self) -> Duration {
        match self {
            GenerationOutcome::Ready { duration, .. }
            | GenerationOutcome::Failed { duration, .. }
            | GenerationOutcome::Cancelled { duration } => *duration,
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            GenerationOutcome::Ready { .. } => "ready",
            GenerationOutcome::Failed { error, .. } => error.label(),
            GenerationOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Process-wide registry of generation sessions
pub struct GenerationManager {
    sessions: RwLock<HashMap<String, Arc<GenerationSession>>>,
    backend: Arc<dyn GenerationBackend>,
    artifacts: Arc<dyn ArtifactStore>,
    required_keys: Vec<String>,
    timeout: Duration,
    stale_after: Duration,
    sweep_interval: Duration,
    /// Keeps an explicit sweep from overlapping the timer
    sweep_lock: Mutex<()>,
}

impl GenerationManager {
    pub fn new(
        config: &GenerationConfig,
        required_keys: Vec<String>,
        backend: Arc<dyn GenerationBackend>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            backend,
            artifacts,
            required_keys,
            timeout: Duration::from_secs(config.timeout_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Register a session in `starting`
    ///
    /// Fails if a non-terminal session already holds the identifier. A
    /// settled `ready` session under the same identifier is replaced.
    pub fn register(
        &self,
        specification: Specification,
        session_id: impl Into<String>,
    ) -> Result<Arc<GenerationSession>, GenerationError> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(&session_id) {
            if !existing.is_terminal() {
                return Err(GenerationError::AlreadyRunning(session_id));
            }
        }

        let session = Arc::new(GenerationSession::new(&session_id, specification));
        sessions.insert(session_id.clone(), session.clone());
        metrics::gauge!("specflow_active_generation_sessions").increment(1.0);
        tracing::info!(session_id = %session_id, "Registered generation session");

        Ok(session)
    }

    /// Register and run in one call
    pub async fn start(
        &self,
        specification: Specification,
        session_id: impl Into<String>,
        observer: &dyn GenerationObserver,
    ) -> GenerationOutcome {
        match self.register(specification, session_id) {
            Ok(session) => self.run(session, observer).await,
            Err(error) => GenerationOutcome::Failed {
                error,
                duration: Duration::ZERO,
            },
        }
    }

    /// Validate, invoke the backend, and settle the session
    pub async fn run(&self, session: Arc<GenerationSession>, observer: &dyn GenerationObserver) -> GenerationOutcome {
        let outcome = self.run_inner(&session, observer).await;

        metrics::counter!("specflow_generation_sessions_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("specflow_generation_duration_seconds").record(outcome.duration().as_secs_f64());
        tracing::info!(
            session_id = %session.id,
            outcome = outcome.label(),
            duration_ms = outcome.duration().as_millis() as u64,
            "Generation finished"
        );

        outcome
    }

    async fn run_inner(&self, session: &Arc<GenerationSession>, observer: &dyn GenerationObserver) -> GenerationOutcome {
        if let Err(errors) = session.specification.validate(&self.required_keys) {
            tracing::warn!(session_id = %session.id, errors = errors.len(), "Specification failed validation");
            self.settle(session, SessionStatus::Error, observer);
            self.discard(session).await;
            return GenerationOutcome::Failed {
                error: GenerationError::Validation(errors),
                duration: session.started_at.elapsed(),
            };
        }

        observer.on_validation_passed();
        if !session.advance(SessionStatus::Starting, SessionStatus::Generating) {
            return self.cancelled(session).await;
        }
        observer.on_status_changed(SessionStatus::Generating);

        let request = GenerationRequest {
            session_id: session.id.clone(),
            specification: session.specification.clone(),
            workspace: self.artifacts.location(&session.id).to_string_lossy().into_owned(),
        };
        let callbacks = SessionCallbacks { session, observer };
        let signal = session.cancel_handle().signal();

        let result = tokio::time::timeout(
            self.timeout,
            self.backend.generate(request, &callbacks, signal),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                session.set_artifacts(output.artifact_path.clone(), output.preview_url.clone());
                if !self.settle(session, SessionStatus::Ready, observer) {
                    return self.cancelled(session).await;
                }
                GenerationOutcome::Ready {
                    artifact_path: output.artifact_path,
                    preview_url: session.preview_endpoint(),
                    duration: session.started_at.elapsed(),
                }
            },
            Ok(Err(error)) => {
                if !self.settle(session, SessionStatus::Error, observer) {
                    return self.cancelled(session).await;
                }
                tracing::warn!(session_id = %session.id, error = %error, "Generation backend failed");
                self.discard(session).await;
                GenerationOutcome::Failed {
                    error: error.into(),
                    duration: session.started_at.elapsed(),
                }
            },
            Err(_) => {
                session.cancel_handle().cancel();
                if !self.settle(session, SessionStatus::Error, observer) {
                    return self.cancelled(session).await;
                }
                tracing::warn!(session_id = %session.id, timeout = ?self.timeout, "Generation timed out");
                self.discard(session).await;
                GenerationOutcome::Failed {
                    error: GenerationError::Timeout(self.timeout),
                    duration: session.started_at.elapsed(),
                }
            },
        }
    }

    /// Session lost a race against `cancel` or the sweep
    ///
    /// The backend may have written files after the first cleanup.
    async fn cancelled(&self, session: &GenerationSession) -> GenerationOutcome {
        self.cleanup(&session.id).await;
        GenerationOutcome::Cancelled {
            duration: session.started_at.elapsed(),
        }
    }

    /// Cancel a non-terminal session; false if unknown or already settled
    pub async fn cancel(&self, session_id: &str) -> bool {
        let Some(session) = self.get(session_id) else {
            return false;
        };
        if !session.set_status(SessionStatus::Cancelled) {
            return false;
        }
        metrics::gauge!("specflow_active_generation_sessions").decrement(1.0);
        session.cancel_handle().cancel();
        tracing::info!(session_id = %session_id, "Generation session cancelled");

        self.discard(&session).await;
        true
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<GenerationSession>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn status(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.get(session_id).map(|s| s.snapshot())
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self.sessions.read().values().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// Sessions that have not settled yet
    pub fn active_count(&self) -> usize {
        self.sessions.read().values().filter(|s| !s.is_terminal()).count()
    }

    /// Drop a settled `ready` session from the registry
    pub fn release(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(session_id) {
            Some(session) if session.status() == SessionStatus::Ready => {
                sessions.remove(session_id);
                tracing::debug!(session_id = %session_id, "Released ready session");
                true
            },
            _ => false,
        }
    }

    /// Evict every non-`ready` session older than `max_age`
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let _guard = self.sweep_lock.lock().await;

        let evicted: Vec<Arc<GenerationSession>> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.status() != SessionStatus::Ready && s.started_at.elapsed() > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &evicted {
            if session.set_status(SessionStatus::Cancelled) {
                metrics::gauge!("specflow_active_generation_sessions").decrement(1.0);
            }
            session.cancel_handle().cancel();
            self.cleanup(&session.id).await;
            tracing::info!(
                session_id = %session.id,
                age_secs = session.started_at.elapsed().as_secs(),
                "Evicted stale generation session"
            );
        }

        if !evicted.is_empty() {
            metrics::counter!("specflow_sessions_evicted_total").increment(evicted.len() as u64);
        }
        evicted.len()
    }

    /// Run `sweep_stale` on a timer until the returned sender fires
    pub fn start_sweep_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.sweep_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let evicted = manager.sweep_stale(manager.stale_after).await;
                        if evicted > 0 {
                            tracing::info!(
                                "Generation sweep: evicted {} stale sessions ({} remaining)",
                                evicted,
                                manager.sessions.read().len()
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Generation sweep task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Set a terminal status and notify; false if the session had already settled
    fn settle(&self, session: &GenerationSession, status: SessionStatus, observer: &dyn GenerationObserver) -> bool {
        if !session.set_status(status) {
            return false;
        }
        metrics::gauge!("specflow_active_generation_sessions").decrement(1.0);
        observer.on_status_changed(status);
        true
    }

    /// Remove artifacts and unregister
    async fn discard(&self, session: &GenerationSession) {
        self.cleanup(&session.id).await;
        let mut sessions = self.sessions.write();
        // Only drop the entry if it still belongs to this session
        if sessions
            .get(&session.id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), session))
        {
            sessions.remove(&session.id);
        }
    }

    async fn cleanup(&self, session_id: &str) {
        if let Err(e) = self.artifacts.remove(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Artifact cleanup failed");
        }
    }
}

/// Wraps the observer so backend progress also drives session state
struct SessionCallbacks<'a> {
    session: &'a GenerationSession,
    observer: &'a dyn GenerationObserver,
}

impl GenerationCallbacks for SessionCallbacks<'_> {
    fn on_log(&self, chunk: &str) {
        if !self.session.is_terminal() {
            self.observer.on_log(chunk);
        }
    }

    fn on_file_tree(&self, tree: &FileNode) {
        if self.session.advance(SessionStatus::Generating, SessionStatus::Building) {
            self.observer.on_status_changed(SessionStatus::Building);
        }
        if !self.session.is_terminal() {
            self.observer.on_file_tree(tree);
        }
    }

    fn on_preview_ready(&self, url: &str) {
        if !self.session.is_terminal() {
            self.session.set_preview_endpoint(url);
            self.observer.on_preview_ready(url);
        }
    }

    fn on_error(&self, message: &str) {
        if !self.session.is_terminal() {
            self.observer.on_error(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::backend::NoopObserver;
    use crate::error::BackendError;
    use crate::session::CancelSignal;
    use crate::BackendOutput;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use tempfile::TempDir;

    fn specification() -> Specification {
        Specification::from_value(json!({
            "name": "A",
            "description": "d",
            "users": ["x"],
            "goal": ["g"],
            "features": ["f"],
            "tech_stack": {"frontend": "y"},
            "ui_style": "s",
        }))
        .unwrap()
    }

    fn required_keys() -> Vec<String> {
        specflow_config::constants::REQUIRED_KEYS
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    /// Scripted backend that writes a file into the workspace first
    enum Script {
        Succeed,
        Fail(&'static str),
        WaitForCancel,
        Hang,
    }

    struct ScriptedBackend {
        script: Script,
        calls: SyncMutex<usize>,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: SyncMutex::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(
            &self,
            request: GenerationRequest,
            callbacks: &dyn GenerationCallbacks,
            mut cancel: CancelSignal,
        ) -> Result<BackendOutput, BackendError> {
            *self.calls.lock() += 1;
            std::fs::create_dir_all(&request.workspace).unwrap();
            std::fs::write(format!("{}/index.html", request.workspace), "<html/>").unwrap();
            callbacks.on_log("scaffolding");
            callbacks.on_file_tree(&FileNode::file("index.html", "index.html"));

            match self.script {
                Script::Succeed => {
                    callbacks.on_preview_ready("http://localhost:5173");
                    Ok(BackendOutput {
                        artifact_path: request.workspace,
                        preview_url: Some("http://localhost:5173".to_string()),
                    })
                },
                Script::Fail(message) => {
                    callbacks.on_error(message);
                    Err(BackendError::Reported(message.to_string()))
                },
                Script::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(BackendError::Reported("cancelled".to_string()))
                },
                Script::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                },
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        statuses: SyncMutex<Vec<SessionStatus>>,
        logs: SyncMutex<Vec<String>>,
        validated: SyncMutex<bool>,
    }

    impl GenerationCallbacks for RecordingObserver {
        fn on_log(&self, chunk: &str) {
            self.logs.lock().push(chunk.to_string());
        }
        fn on_file_tree(&self, _tree: &FileNode) {}
        fn on_preview_ready(&self, _url: &str) {}
        fn on_error(&self, _message: &str) {}
    }

    impl GenerationObserver for RecordingObserver {
        fn on_validation_passed(&self) {
            *self.validated.lock() = true;
        }
        fn on_status_changed(&self, status: SessionStatus) {
            self.statuses.lock().push(status);
        }
    }

    fn manager(backend: Arc<dyn GenerationBackend>, dir: &TempDir) -> Arc<GenerationManager> {
        Arc::new(GenerationManager::new(
            &GenerationConfig::default(),
            required_keys(),
            backend,
            Arc::new(FsArtifactStore::new(dir.path())),
        ))
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Succeed), &dir);
        let observer = RecordingObserver::default();

        let outcome = manager.start(specification(), "s-1", &observer).await;
        match outcome {
            GenerationOutcome::Ready {
                artifact_path,
                preview_url,
                ..
            } => {
                assert!(artifact_path.ends_with("s-1"));
                assert_eq!(preview_url.as_deref(), Some("http://localhost:5173"));
            },
            other => panic!("expected ready, got {:?}", other),
        }

        assert!(*observer.validated.lock());
        assert_eq!(
            *observer.statuses.lock(),
            vec![SessionStatus::Generating, SessionStatus::Building, SessionStatus::Ready]
        );
        assert_eq!(*observer.logs.lock(), vec!["scaffolding".to_string()]);

        // Ready sessions stay registered with their artifacts
        let snapshot = manager.status("s-1").unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert!(dir.path().join("s-1/index.html").exists());

        assert!(manager.release("s-1"));
        assert!(manager.status("s-1").is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_skips_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(Script::Succeed);
        let manager = manager(backend.clone(), &dir);

        let incomplete = Specification::from_value(json!({"name": "A", "users": []})).unwrap();
        let outcome = manager.start(incomplete, "s-1", &NoopObserver).await;

        match outcome {
            GenerationOutcome::Failed {
                error: GenerationError::Validation(errors),
                ..
            } => {
                assert!(errors.iter().any(|e| e.field == "users"));
                assert!(errors.iter().any(|e| e.field == "goal"));
            },
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert_eq!(*backend.calls.lock(), 0);
        assert!(manager.status("s-1").is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Fail("build failed")), &dir);
        let observer = RecordingObserver::default();

        let outcome = manager.start(specification(), "s-1", &observer).await;
        assert!(matches!(
            outcome,
            GenerationOutcome::Failed {
                error: GenerationError::Backend(BackendError::Reported(_)),
                ..
            }
        ));
        assert_eq!(observer.statuses.lock().last(), Some(&SessionStatus::Error));
        assert!(!dir.path().join("s-1").exists());
        assert!(manager.status("s-1").is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::WaitForCancel), &dir);

        let session = manager.register(specification(), "s-1").unwrap();
        let runner = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run(session, &NoopObserver).await })
        };

        while manager.status("s-1").map(|s| s.status) != Some(SessionStatus::Building) {
            tokio::task::yield_now().await;
        }

        assert!(manager.cancel("s-1").await);
        assert!(!manager.cancel("s-1").await);

        let outcome = runner.await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Cancelled { .. }));
        assert!(!dir.path().join("s-1").exists());
        assert!(manager.status("s-1").is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_ready() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Succeed), &dir);
        assert!(!manager.cancel("missing").await);

        manager.start(specification(), "s-1", &NoopObserver).await;
        assert!(!manager.cancel("s-1").await);
        assert_eq!(manager.status("s-1").unwrap().status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Succeed), &dir);

        manager.register(specification(), "s-1").unwrap();
        assert!(matches!(
            manager.register(specification(), "s-1"),
            Err(GenerationError::AlreadyRunning(_))
        ));
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Hang), &dir);

        let outcome = manager.start(specification(), "s-1", &NoopObserver).await;
        assert!(matches!(
            outcome,
            GenerationOutcome::Failed {
                error: GenerationError::Timeout(_),
                ..
            }
        ));
        assert!(!dir.path().join("s-1").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_stale_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Succeed), &dir);

        let old = manager.register(specification(), "old").unwrap();
        old.set_status(SessionStatus::Generating);
        tokio::time::advance(Duration::from_secs(35 * 60)).await;

        let young = manager.register(specification(), "young").unwrap();
        young.set_status(SessionStatus::Generating);
        tokio::time::advance(Duration::from_secs(5 * 60)).await;

        assert_eq!(manager.sweep_stale(Duration::from_secs(30 * 60)).await, 1);
        assert!(manager.status("old").is_none());
        assert!(old.cancel_handle().is_cancelled());
        assert_eq!(manager.status("young").unwrap().status, SessionStatus::Generating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_never_evicts_ready() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(ScriptedBackend::new(Script::Succeed), &dir);

        manager.start(specification(), "done", &NoopObserver).await;
        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;

        assert_eq!(manager.sweep_stale(Duration::from_secs(60)).await, 0);
        assert_eq!(manager.status("done").unwrap().status, SessionStatus::Ready);
    }
}
