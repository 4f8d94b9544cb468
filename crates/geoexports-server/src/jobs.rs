//! Background export jobs.
//!
//! [`ExportJobOrchestrator::submit`] runs every pre-flight check on the
//! request task and either rejects the request or hands back an
//! [`Accepted`] job. The job itself runs detached: it reads every matching
//! row, renders the artifact and sends exactly one notification with the
//! outcome. Nobody polls for it; the registry only feeds operator logs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use geoexports_core::{ExportDefinition, ExportId, Identity, RoleId};
use geoexports_filter::{FilterError, FilterParams, translate};
use geoexports_notifications::{DynNotificationSender, ExportNotification, ExportOutcome};
use geoexports_output::{Artifact, ArtifactStore, ExportFormat, RenderError};
use geoexports_storage::{DynMetadataStore, DynQueryBackend, StorageError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::{Authorization, AuthorizationGate};
use crate::config::{ExportsConfig, JobsConfig};
use crate::descriptor::{DatasetResolver, ResolveError};
use crate::executor::{ExecutorError, QueryExecutor};

/// Finished jobs stay in the registry this long.
const REGISTRY_TTL: TimeDelta = TimeDelta::hours(1);

/// Why a request is not a valid export request.
#[derive(Debug, Error)]
pub enum InvalidRequest {
    #[error("export id must be a positive integer, got {0}")]
    ExportId(ExportId),

    #[error("format '{0}' is not available")]
    Format(String),

    #[error("no export with id {0}")]
    UnknownExport(ExportId),

    #[error(transparent)]
    Filter(FilterError),
}

/// A request refused before any job started.
#[derive(Debug, Error)]
pub enum SubmitRejection {
    #[error(transparent)]
    InvalidRequest(InvalidRequest),

    #[error("Not Allowed")]
    Forbidden,

    #[error("no user for role {0}")]
    NoUser(RoleId),

    #[error("no email address for role {0}")]
    NoEmail(RoleId),

    #[error("pre-flight failed: {0}")]
    Internal(String),
}

impl From<InvalidRequest> for SubmitRejection {
    fn from(err: InvalidRequest) -> Self {
        Self::InvalidRequest(err)
    }
}

impl From<StorageError> for SubmitRejection {
    fn from(err: StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Failures inside a running job. Reported through the failure notification.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Query(#[from] ExecutorError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("{0} step timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("worker failed: {0}")]
    Worker(String),
}

/// One export request, as received.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub export_id: ExportId,
    pub format: String,
    pub filters: FilterParams,
    pub identity: Identity,
    /// Replaces the email on file when set and not blank.
    pub email: Option<String>,
}

/// Job lifecycle, as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded { location: String, rows: usize },
    Failed { reason: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub export_id: ExportId,
    pub format: ExportFormat,
    pub recipient: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job that passed pre-flight and is now running detached.
#[derive(Debug)]
pub struct Accepted {
    pub job_id: Uuid,
    /// Resolves to the final state once the notification attempt is done.
    pub handle: JoinHandle<JobState>,
}

/// Worker pool bounds and per-step timeouts.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub max_concurrent_jobs: usize,
    pub query_timeout: Duration,
    pub render_timeout: Duration,
    pub notify_timeout: Duration,
    /// Artifacts older than this are purged before each write.
    pub retention: Option<Duration>,
}

impl From<&JobsConfig> for JobSettings {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            query_timeout: config.query_timeout(),
            render_timeout: config.render_timeout(),
            notify_timeout: config.notify_timeout(),
            retention: config.retention(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

/// Everything a job needs once pre-flight is done.
#[derive(Debug)]
struct PreparedJob {
    definition: ExportDefinition,
    format: ExportFormat,
    filters: FilterParams,
    recipient: String,
}

struct Inner {
    metadata: DynMetadataStore,
    gate: AuthorizationGate,
    resolver: DatasetResolver,
    executor: QueryExecutor,
    artifacts: ArtifactStore,
    sender: DynNotificationSender,
    formats: Vec<ExportFormat>,
    permits: Arc<Semaphore>,
    settings: JobSettings,
    registry: DashMap<Uuid, JobRecord>,
}

#[derive(Clone)]
pub struct ExportJobOrchestrator {
    inner: Arc<Inner>,
}

impl ExportJobOrchestrator {
    pub fn new(
        metadata: DynMetadataStore,
        backend: DynQueryBackend,
        sender: DynNotificationSender,
        exports: &ExportsConfig,
        settings: JobSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                gate: AuthorizationGate::new(metadata.clone()),
                resolver: DatasetResolver::new(metadata.clone(), backend.clone()),
                executor: QueryExecutor::new(backend),
                metadata,
                artifacts: ArtifactStore::new(&exports.exports_dir, &exports.public_url),
                sender,
                formats: exports.formats.clone(),
                permits,
                settings,
                registry: DashMap::new(),
            }),
        }
    }

    /// Formats accepted by [`submit`](Self::submit).
    pub fn formats(&self) -> &[ExportFormat] {
        &self.inner.formats
    }

    /// Registry entry for a job.
    pub fn job(&self, job_id: Uuid) -> Option<JobRecord> {
        self.inner.registry.get(&job_id).map(|r| r.value().clone())
    }

    /// Jobs still queued or running.
    pub fn active_jobs(&self) -> usize {
        self.inner
            .registry
            .iter()
            .filter(|r| !r.state.is_finished())
            .count()
    }

    /// Check the request and start the job.
    ///
    /// Rejections happen here and never reach the notification sender.
    #[instrument(skip_all, fields(export_id = request.export_id, format = %request.format, id_role = request.identity.id_role))]
    pub async fn submit(&self, request: ExportRequest) -> Result<Accepted, SubmitRejection> {
        let job = self.preflight(request).await?;
        self.prune_registry();

        let job_id = Uuid::new_v4();
        let now = Utc::now();
        self.inner.registry.insert(
            job_id,
            JobRecord {
                export_id: job.definition.id,
                format: job.format,
                recipient: job.recipient.clone(),
                state: JobState::Queued,
                created_at: now,
                updated_at: now,
            },
        );
        info!(
            job_id = %job_id,
            export_id = job.definition.id,
            format = job.format.key(),
            "export job accepted"
        );

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run_job(job_id, job).await });
        Ok(Accepted { job_id, handle })
    }

    async fn preflight(&self, request: ExportRequest) -> Result<PreparedJob, SubmitRejection> {
        let ExportRequest {
            export_id,
            format,
            filters,
            identity,
            email,
        } = request;

        if export_id < 1 {
            return Err(InvalidRequest::ExportId(export_id).into());
        }
        let format = ExportFormat::parse(&format)
            .filter(|f| self.inner.formats.contains(f))
            .ok_or(InvalidRequest::Format(format))?;

        let definition = match self.inner.gate.authorize(export_id, identity).await? {
            Authorization::Allowed(definition) => definition,
            Authorization::Denied => return Err(SubmitRejection::Forbidden),
            Authorization::UnknownExport => {
                return Err(InvalidRequest::UnknownExport(export_id).into());
            }
        };

        match self.inner.resolver.describe(&definition).await {
            Ok(descriptor) => {
                translate(&filters, &descriptor.columns).map_err(InvalidRequest::Filter)?;
            }
            Err(ResolveError::EmptyDataset { schema, relation }) => {
                debug!(%schema, %relation, "relation unreadable at submit; the job will report it");
            }
            Err(ResolveError::NotFound(id)) => return Err(InvalidRequest::UnknownExport(id).into()),
            Err(ResolveError::Storage(e)) => return Err(e.into()),
        }

        let user = self
            .inner
            .metadata
            .get_user(identity.id_role)
            .await?
            .ok_or(SubmitRejection::NoUser(identity.id_role))?;

        let recipient = email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .or_else(|| user.contact_email().map(str::to_string))
            .ok_or(SubmitRejection::NoEmail(identity.id_role))?;

        Ok(PreparedJob {
            definition,
            format,
            filters,
            recipient,
        })
    }

    async fn run_job(self, job_id: Uuid, job: PreparedJob) -> JobState {
        let _permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "worker pool closed, running unbounded");
                None
            }
        };
        self.set_state(job_id, JobState::Running);
        debug!(job_id = %job_id, "export job started");

        let outcome = match self.produce(job_id, &job).await {
            Ok(artifact) => {
                info!(
                    job_id = %job_id,
                    location = %artifact.location,
                    rows = artifact.rows,
                    "export job succeeded"
                );
                ExportOutcome::Succeeded {
                    location: artifact.location,
                    row_count: artifact.rows,
                }
            }
            Err(e) => {
                error!(job_id = %job_id, export_id = job.definition.id, error = %e, "export job failed");
                ExportOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.notify(job_id, &job, outcome.clone()).await;

        let state = match outcome {
            ExportOutcome::Succeeded {
                location,
                row_count,
            } => JobState::Succeeded {
                location,
                rows: row_count,
            },
            ExportOutcome::Failed { reason } => JobState::Failed { reason },
        };
        self.set_state(job_id, state.clone());
        state
    }

    /// Query and render. The artifact is not published unless both succeed.
    async fn produce(&self, job_id: Uuid, job: &PreparedJob) -> Result<Artifact, JobError> {
        self.purge_expired().await;

        let settings = &self.inner.settings;
        let (descriptor, rows) = timeout(settings.query_timeout, async {
            let descriptor = self.inner.resolver.resolve(job.definition.id).await?;
            let filters = translate(&job.filters, &descriptor.columns)?;
            let page = self.inner.executor.run_all(&descriptor, &filters).await?;
            Ok::<_, JobError>((descriptor, page.rows))
        })
        .await
        .map_err(|_| JobError::Timeout("query", settings.query_timeout))??;

        let artifacts = self.inner.artifacts.clone();
        let format = job.format;
        let tag = job_id.simple().to_string();
        let render =
            tokio::task::spawn_blocking(move || artifacts.write(&descriptor, format, &rows, &tag));
        let artifact = timeout(settings.render_timeout, render)
            .await
            .map_err(|_| JobError::Timeout("render", settings.render_timeout))?
            .map_err(|e| JobError::Worker(e.to_string()))??;
        Ok(artifact)
    }

    async fn purge_expired(&self) {
        let Some(retention) = self.inner.settings.retention else {
            return;
        };
        let artifacts = self.inner.artifacts.clone();
        match tokio::task::spawn_blocking(move || artifacts.purge_older_than(retention)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(removed)) => info!(removed, "purged expired artifacts"),
            Ok(Err(e)) => warn!(error = %e, "failed to purge expired artifacts"),
            Err(e) => warn!(error = %e, "artifact purge task failed"),
        }
    }

    /// The one notification attempt of a job. Failures are only logged.
    async fn notify(&self, job_id: Uuid, job: &PreparedJob, outcome: ExportOutcome) {
        let notification = ExportNotification::new(
            &job.recipient,
            job.definition.id,
            &job.definition.label,
            job.format.key(),
            outcome,
        );
        let timeout_after = self.inner.settings.notify_timeout;
        match timeout(timeout_after, self.inner.sender.send(&notification)).await {
            Ok(Ok(())) => debug!(job_id = %job_id, "export notification sent"),
            Ok(Err(e)) => error!(
                job_id = %job_id,
                recipient = %job.recipient,
                error = %e,
                "failed to send export notification"
            ),
            Err(_) => error!(
                job_id = %job_id,
                recipient = %job.recipient,
                timeout = ?timeout_after,
                "export notification timed out"
            ),
        }
    }

    fn set_state(&self, job_id: Uuid, state: JobState) {
        if let Some(mut record) = self.inner.registry.get_mut(&job_id) {
            debug!(job_id = %job_id, from = ?record.state, to = ?state, "job state changed");
            record.state = state;
            record.updated_at = Utc::now();
        }
    }

    fn prune_registry(&self) {
        let cutoff = Utc::now() - REGISTRY_TTL;
        self.inner
            .registry
            .retain(|_, record| !record.state.is_finished() || record.updated_at > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geoexports_core::{ColumnInfo, ColumnType, UserRecord};
    use geoexports_db_memory::{InMemoryDatasets, InMemoryMetadataStore};
    use geoexports_notifications::{NotificationError, NotificationSender};
    use geoexports_storage::{DatasetQuery, QueryBackend, QueryPage};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<ExportNotification>>,
        fail: bool,
    }

    impl RecordingSender {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<ExportNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, notification: &ExportNotification) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                Err(NotificationError::SendFailed("relay down".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Records the attempt, then never completes.
    #[derive(Default)]
    struct HangingSender {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSender for HangingSender {
        async fn send(&self, _notification: &ExportNotification) -> Result<(), NotificationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    /// Slow queries that record how many ran at once.
    struct TrackingBackend {
        inner: Arc<InMemoryDatasets>,
        in_flight: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueryBackend for TrackingBackend {
        async fn describe(
            &self,
            schema: &str,
            relation: &str,
        ) -> Result<Vec<ColumnInfo>, StorageError> {
            self.inner.describe(schema, relation).await
        }

        async fn query(&self, query: &DatasetQuery<'_>) -> Result<QueryPage, StorageError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            let page = self.inner.query(query).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            page
        }
    }

    /// Describes instantly, never answers queries in time.
    struct StalledBackend(Arc<InMemoryDatasets>);

    #[async_trait]
    impl QueryBackend for StalledBackend {
        async fn describe(
            &self,
            schema: &str,
            relation: &str,
        ) -> Result<Vec<ColumnInfo>, StorageError> {
            self.0.describe(schema, relation).await
        }

        async fn query(&self, query: &DatasetQuery<'_>) -> Result<QueryPage, StorageError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.0.query(query).await
        }
    }

    struct Fixture {
        orchestrator: ExportJobOrchestrator,
        sender: Arc<RecordingSender>,
        metadata: Arc<InMemoryMetadataStore>,
        datasets: Arc<InMemoryDatasets>,
        dir: tempfile::TempDir,
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("name", ColumnType::Text),
            ColumnInfo::new("count", ColumnType::Integer),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ]
    }

    fn populate(metadata: &InMemoryMetadataStore, datasets: &InMemoryDatasets) {
        metadata
            .insert_export(
                ExportDefinition::new(5, "Observations", "gn", "v_obs")
                    .with_geometry("geom", 4326)
                    .with_public(true),
            )
            .unwrap();
        metadata
            .insert_export(ExportDefinition::new(6, "Private", "gn", "v_obs"))
            .unwrap();
        metadata
            .insert_export(ExportDefinition::new(7, "Attributes", "gn", "v_attrs").with_public(true))
            .unwrap();
        metadata.insert_user(UserRecord::new(1).with_email("ana@example.org"));
        metadata.insert_user(UserRecord::new(2));

        let rows = vec![
            json!({"name": "Smith", "count": 5, "geom": {"type": "Point", "coordinates": [2.35, 48.85]}}),
            json!({"name": "Jones", "count": 12, "geom": {"type": "Point", "coordinates": [4.83, 45.76]}}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        datasets.insert_relation("gn", "v_obs", columns(), rows);
        datasets.insert_relation(
            "gn",
            "v_attrs",
            vec![ColumnInfo::new("name", ColumnType::Text)],
            vec![json!({"name": "a"}).as_object().cloned().unwrap()],
        );
    }

    fn fixture_with(
        sender: RecordingSender,
        backend: impl FnOnce(Arc<InMemoryDatasets>) -> DynQueryBackend,
        settings: JobSettings,
    ) -> Fixture {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let datasets = Arc::new(InMemoryDatasets::new());
        populate(&metadata, &datasets);
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportsConfig {
            exports_dir: dir.path().to_path_buf(),
            public_url: "https://data.example.org/exports".into(),
            ..ExportsConfig::default()
        };
        let sender = Arc::new(sender);
        let orchestrator = ExportJobOrchestrator::new(
            metadata.clone(),
            backend(datasets.clone()),
            sender.clone(),
            &exports,
            settings,
        );
        Fixture {
            orchestrator,
            sender,
            metadata,
            datasets,
            dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            RecordingSender::default(),
            |datasets| datasets,
            JobSettings::default(),
        )
    }

    fn request(export_id: ExportId, format: &str, id_role: RoleId) -> ExportRequest {
        ExportRequest {
            export_id,
            format: format.into(),
            filters: FilterParams::new(),
            identity: Identity::new(id_role),
            email: None,
        }
    }

    #[tokio::test]
    async fn test_public_csv_export_sends_one_success_notification() {
        let f = fixture();
        let accepted = f.orchestrator.submit(request(5, "csv", 1)).await.unwrap();
        let state = accepted.handle.await.unwrap();

        let JobState::Succeeded { location, rows } = &state else {
            panic!("unexpected state: {state:?}");
        };
        assert_eq!(*rows, 2);
        assert!(location.starts_with("https://data.example.org/exports/"));
        assert!(location.contains("_5_observations_"));
        assert!(location.ends_with(&format!("{}.csv", accepted.job_id.simple())));

        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "ana@example.org");
        assert!(sent[0].outcome.is_success());

        let file_name = location.rsplit('/').next().unwrap();
        assert!(f.dir.path().join(file_name).exists());
        assert_eq!(f.orchestrator.job(accepted.job_id).unwrap().state, state);
    }

    #[tokio::test]
    async fn test_filters_apply_to_the_export() {
        let f = fixture();
        let mut req = request(5, "json", 1);
        req.filters = FilterParams::from_query_string("filter_n_up_count=10");
        let state = f.orchestrator.submit(req).await.unwrap().handle.await.unwrap();
        assert!(matches!(state, JobState::Succeeded { rows: 1, .. }));
    }

    #[tokio::test]
    async fn test_unknown_export_is_rejected_before_any_job() {
        let f = fixture();
        let err = f.orchestrator.submit(request(999, "csv", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitRejection::InvalidRequest(InvalidRequest::UnknownExport(999))
        ));
        assert!(f.sender.sent().is_empty());
        assert_eq!(f.orchestrator.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_and_format() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.submit(request(0, "csv", 1)).await,
            Err(SubmitRejection::InvalidRequest(InvalidRequest::ExportId(0)))
        ));
        assert!(matches!(
            f.orchestrator.submit(request(5, "xlsx", 1)).await,
            Err(SubmitRejection::InvalidRequest(InvalidRequest::Format(_)))
        ));
    }

    #[tokio::test]
    async fn test_disabled_format_is_rejected() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let datasets = Arc::new(InMemoryDatasets::new());
        populate(&metadata, &datasets);
        let exports = ExportsConfig {
            formats: vec![ExportFormat::Csv],
            ..ExportsConfig::default()
        };
        let orchestrator = ExportJobOrchestrator::new(
            metadata,
            datasets,
            Arc::new(RecordingSender::default()),
            &exports,
            JobSettings::default(),
        );
        assert!(matches!(
            orchestrator.submit(request(5, "geojson", 1)).await,
            Err(SubmitRejection::InvalidRequest(InvalidRequest::Format(_)))
        ));
    }

    #[tokio::test]
    async fn test_private_export_is_forbidden() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.submit(request(6, "csv", 1)).await,
            Err(SubmitRejection::Forbidden)
        ));
        f.metadata.grant(1, 6);
        assert!(f.orchestrator.submit(request(6, "csv", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_filter_is_rejected() {
        let f = fixture();
        let mut req = request(5, "csv", 1);
        req.filters = FilterParams::from_query_string("filter_n_up_count=ten");
        assert!(matches!(
            f.orchestrator.submit(req).await,
            Err(SubmitRejection::InvalidRequest(InvalidRequest::Filter(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.submit(request(5, "csv", 42)).await,
            Err(SubmitRejection::NoUser(42))
        ));
    }

    #[tokio::test]
    async fn test_no_email_sends_nothing() {
        let f = fixture();
        assert!(matches!(
            f.orchestrator.submit(request(5, "csv", 2)).await,
            Err(SubmitRejection::NoEmail(2))
        ));

        let mut blank = request(5, "csv", 2);
        blank.email = Some("   ".into());
        assert!(matches!(
            f.orchestrator.submit(blank).await,
            Err(SubmitRejection::NoEmail(2))
        ));
        assert!(f.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_override_email_wins() {
        let f = fixture();
        let mut req = request(5, "csv", 1);
        req.email = Some("other@example.org".into());
        f.orchestrator.submit(req).await.unwrap().handle.await.unwrap();
        assert_eq!(f.sender.sent()[0].recipient, "other@example.org");
    }

    #[tokio::test]
    async fn test_relation_dropped_after_accept_sends_one_failure() {
        let f = fixture();
        let accepted = f.orchestrator.submit(request(5, "csv", 1)).await.unwrap();
        f.datasets.drop_relation("gn", "v_obs");
        let state = accepted.handle.await.unwrap();
        // The job may have read the relation before it was dropped.
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].outcome.is_success(), matches!(state, JobState::Succeeded { .. }));
    }

    #[tokio::test]
    async fn test_missing_relation_at_submit_is_accepted_then_fails() {
        let f = fixture();
        f.datasets.drop_relation("gn", "v_obs");
        let accepted = f.orchestrator.submit(request(5, "csv", 1)).await.unwrap();
        let state = accepted.handle.await.unwrap();
        assert!(matches!(state, JobState::Failed { .. }));
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].outcome.is_success());
    }

    #[tokio::test]
    async fn test_shapefile_without_geometry_fails() {
        let f = fixture();
        let state = f
            .orchestrator
            .submit(request(7, "shp", 1))
            .await
            .unwrap()
            .handle
            .await
            .unwrap();
        let JobState::Failed { reason } = state else {
            panic!("expected failure");
        };
        assert!(reason.contains("rendering failed"));
        assert_eq!(f.sender.sent().len(), 1);
        assert_eq!(std::fs::read_dir(f.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_notification_failure_is_attempted_once() {
        let f = fixture_with(
            RecordingSender::failing(),
            |datasets| datasets,
            JobSettings::default(),
        );
        let state = f
            .orchestrator
            .submit(request(5, "geojson", 1))
            .await
            .unwrap()
            .handle
            .await
            .unwrap();
        assert!(matches!(state, JobState::Succeeded { .. }));
        assert_eq!(f.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_query_timeout_fails_the_job() {
        let settings = JobSettings {
            query_timeout: Duration::from_millis(50),
            ..JobSettings::default()
        };
        let f = fixture_with(
            RecordingSender::default(),
            |datasets| Arc::new(StalledBackend(datasets)),
            settings,
        );
        let state = f
            .orchestrator
            .submit(request(5, "csv", 1))
            .await
            .unwrap()
            .handle
            .await
            .unwrap();
        let JobState::Failed { reason } = state else {
            panic!("expected failure");
        };
        assert!(reason.contains("query step timed out"));
        assert_eq!(f.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_jobs_beyond_the_bound_wait_for_a_permit() {
        let settings = JobSettings {
            max_concurrent_jobs: 1,
            ..JobSettings::default()
        };
        let peak = Arc::new(AtomicUsize::new(0));
        let tracked = peak.clone();
        let f = fixture_with(
            RecordingSender::default(),
            move |inner| {
                Arc::new(TrackingBackend {
                    inner,
                    in_flight: AtomicUsize::new(0),
                    peak: tracked,
                })
            },
            settings,
        );

        let mut handles = Vec::new();
        for format in ["csv", "json", "geojson"] {
            handles.push(f.orchestrator.submit(request(5, format, 1)).await.unwrap().handle);
        }
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), JobState::Succeeded { .. }));
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(f.sender.sent().len(), 3);
        assert_eq!(f.orchestrator.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_notify_timeout_ends_the_job_after_one_attempt() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let datasets = Arc::new(InMemoryDatasets::new());
        populate(&metadata, &datasets);
        let dir = tempfile::tempdir().unwrap();
        let exports = ExportsConfig {
            exports_dir: dir.path().to_path_buf(),
            ..ExportsConfig::default()
        };
        let sender = Arc::new(HangingSender::default());
        let orchestrator = ExportJobOrchestrator::new(
            metadata,
            datasets,
            sender.clone(),
            &exports,
            JobSettings {
                notify_timeout: Duration::from_millis(50),
                ..JobSettings::default()
            },
        );

        let accepted = orchestrator.submit(request(5, "csv", 1)).await.unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), accepted.handle)
            .await
            .expect("job must not hang on the sender")
            .unwrap();

        assert!(state.is_finished());
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.job(accepted.job_id).unwrap().state, state);
    }

    #[tokio::test]
    async fn test_render_timeout_fails_the_job() {
        let settings = JobSettings {
            render_timeout: Duration::ZERO,
            ..JobSettings::default()
        };
        let f = fixture_with(RecordingSender::default(), |datasets| datasets, settings);
        let rows = (0..50_000)
            .map(|i| json!({"name": format!("row {i}")}).as_object().cloned().unwrap())
            .collect();
        f.datasets.insert_relation(
            "gn",
            "v_attrs",
            vec![ColumnInfo::new("name", ColumnType::Text)],
            rows,
        );

        let state = f
            .orchestrator
            .submit(request(7, "csv", 1))
            .await
            .unwrap()
            .handle
            .await
            .unwrap();
        let JobState::Failed { reason } = state else {
            panic!("expected failure");
        };
        assert!(reason.contains("render step timed out"));
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].outcome.is_success());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_write_separate_artifacts() {
        let f = fixture();
        let all = f.orchestrator.submit(request(5, "csv", 1)).await.unwrap();
        let mut filtered = request(5, "csv", 1);
        filtered.filters = FilterParams::from_query_string("filter_n_up_count=10");
        let filtered = f.orchestrator.submit(filtered).await.unwrap();

        let JobState::Succeeded { location: all_at, rows: 2 } = all.handle.await.unwrap() else {
            panic!("expected two rows");
        };
        let JobState::Succeeded { location: filtered_at, rows: 1 } = filtered.handle.await.unwrap()
        else {
            panic!("expected one row");
        };
        assert_ne!(all_at, filtered_at);

        let lines = |location: &str| {
            let file_name = location.rsplit('/').next().unwrap();
            std::fs::read_to_string(f.dir.path().join(file_name))
                .unwrap()
                .lines()
                .count()
        };
        assert_eq!(lines(&all_at), 3);
        assert_eq!(lines(&filtered_at), 2);
    }
}
