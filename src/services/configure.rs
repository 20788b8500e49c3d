use crate::error::{AppResult, PortabilityError};
use crate::models::job::{DataType, Job, JobId, Side};
use crate::services::job_codec::JobIdCodec;
use crate::services::job_store::JobStore;
use crate::services::registry::ExtensionRegistry;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use url::Url;

/// What to do when a returning caller submits a selection that differs from the
/// job their token points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMismatchPolicy {
    /// Leave the old job alone and start a new one under a new token.
    #[default]
    Replace,
    /// Refuse the request; the caller has to drop the token first.
    Reject,
}

impl FromStr for SelectionMismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(SelectionMismatchPolicy::Replace),
            "reject" => Ok(SelectionMismatchPolicy::Reject),
            other => Err(format!("unknown selection mismatch policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigureRequest {
    pub existing_token: Option<String>,
    pub data_type: String,
    pub export_service: String,
    pub import_service: String,
}

#[derive(Debug, Clone)]
pub struct ConfigureOutcome {
    pub redirect_url: Url,
    /// Opaque token for the session cookie.
    pub job_token: String,
    pub job_id: JobId,
    pub reused_existing: bool,
}

struct Selection {
    data_type: DataType,
    export_service: String,
    import_service: String,
}

/// Creates or reuses a job for a selection and starts the export-side
/// authorization flow.
pub struct ConfigurationOrchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<ExtensionRegistry>,
    codec: JobIdCodec,
    base_api_url: Url,
    mismatch_policy: SelectionMismatchPolicy,
}

impl ConfigurationOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ExtensionRegistry>,
        base_api_url: Url,
    ) -> Self {
        Self {
            store,
            registry,
            codec: JobIdCodec,
            base_api_url,
            mismatch_policy: SelectionMismatchPolicy::default(),
        }
    }

    pub fn with_mismatch_policy(mut self, policy: SelectionMismatchPolicy) -> Self {
        self.mismatch_policy = policy;
        self
    }

    #[instrument(
        skip(self, request),
        fields(
            data_type = %request.data_type,
            export_service = %request.export_service,
            import_service = %request.import_service
        )
    )]
    pub async fn configure(&self, request: ConfigureRequest) -> AppResult<ConfigureOutcome> {
        let selection = self.validate(&request)?;
        let existing = self
            .existing_job(request.existing_token.as_deref(), &selection)
            .await?;

        let (mut job, reused_existing) = match existing {
            Some(job)
                if job.selection_matches(
                    selection.data_type,
                    &selection.export_service,
                    &selection.import_service,
                ) =>
            {
                info!(job_id = %job.id(), "Found existing job, reusing it");
                (job, true)
            }
            Some(job) => match self.mismatch_policy {
                SelectionMismatchPolicy::Reject => {
                    warn!(
                        job_id = %job.id(),
                        "Existing job has a different selection, rejecting"
                    );
                    return Err(PortabilityError::invalid_argument(
                        "selection",
                        "a transfer with a different selection is already in progress",
                    ));
                }
                SelectionMismatchPolicy::Replace => {
                    info!(
                        job_id = %job.id(),
                        "Existing job has a different selection, starting a new one"
                    );
                    (self.create_job(selection).await?, false)
                }
            },
            None => (self.create_job(selection).await?, false),
        };

        let job_token = self.codec.encode(&job);
        let data_type = job.data_type();
        let export_service = job.export_service().to_string();
        let unavailable = |stage: &str, e: &dyn std::fmt::Display| {
            error!(
                job_id = %job.id(),
                service_id = %export_service,
                data_type = %data_type,
                error = %e,
                "{stage}"
            );
            PortabilityError::AuthGeneratorUnavailable {
                service_id: export_service.clone(),
                data_type,
                reason: e.to_string(),
            }
        };

        let generator = self
            .registry
            .get_auth_generator(&export_service, data_type)
            .map_err(|e| unavailable("Could not resolve auth generator", &e))?;

        let initiator = generator
            .generate_auth_url(&self.base_api_url, &job_token)
            .await
            .map_err(|e| unavailable("Auth generator failed", &e))?;

        // The callback may need the seed, so it is stored before anyone is redirected.
        if let Some(initial_auth_data) = initiator.initial_auth_data {
            job.set_initial_auth_data(Side::Export, initial_auth_data);
            self.store.update(&job).await.map_err(|e| {
                error!(
                    job_id = %job.id(),
                    service_id = %export_service,
                    data_type = %data_type,
                    error = %e,
                    "Failed to store initial export auth data"
                );
                match e {
                    PortabilityError::NotFound(msg) => {
                        PortabilityError::InternalInvariantViolation(format!(
                            "job vanished before its initial auth data was stored: {msg}"
                        ))
                    }
                    other => other,
                }
            })?;
            info!(job_id = %job.id(), "Stored initial export auth data");
        }

        info!(
            job_id = %job.id(),
            redirect = %initiator.auth_url,
            "Redirecting to export service authorization"
        );
        Ok(ConfigureOutcome {
            redirect_url: initiator.auth_url,
            job_token,
            job_id: job.id(),
            reused_existing,
        })
    }

    fn validate(&self, request: &ConfigureRequest) -> AppResult<Selection> {
        if request.data_type.is_empty() {
            return Err(PortabilityError::invalid_argument("dataType", "missing"));
        }
        let data_type = request
            .data_type
            .parse::<DataType>()
            .map_err(|e| PortabilityError::invalid_argument("dataType", e.to_string()))?;

        let export_service = request.export_service.as_str();
        if export_service.is_empty() {
            return Err(PortabilityError::invalid_argument("exportService", "missing"));
        }
        self.registry
            .get_exporter(export_service, data_type)
            .map_err(|e| selection_error("exportService", e))?;

        let import_service = request.import_service.as_str();
        if import_service.is_empty() {
            return Err(PortabilityError::invalid_argument("importService", "missing"));
        }
        self.registry
            .get_importer(import_service, data_type)
            .map_err(|e| selection_error("importService", e))?;

        Ok(Selection {
            data_type,
            export_service: export_service.to_string(),
            import_service: import_service.to_string(),
        })
    }

    async fn existing_job(
        &self,
        token: Option<&str>,
        selection: &Selection,
    ) -> AppResult<Option<Job>> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let id = match self.codec.decode(token) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed job token");
                return Ok(None);
            }
        };

        let job = self.store.find(&id).await.inspect_err(|e| {
            error!(
                job_id = %id,
                service_id = %selection.export_service,
                data_type = %selection.data_type,
                error = %e,
                "Failed to look up existing job"
            )
        })?;
        if job.is_none() {
            info!(job_id = %id, "Found job token but no job");
        }
        Ok(job)
    }

    async fn create_job(&self, selection: Selection) -> AppResult<Job> {
        let job = Job::new(
            selection.data_type,
            selection.export_service,
            selection.import_service,
        );
        let job_id = job.id();
        let data_type = job.data_type();
        let export_service = job.export_service();

        self.store.create(&job).await.map_err(|e| {
            error!(
                job_id = %job_id,
                service_id = %export_service,
                data_type = %data_type,
                error = %e,
                "Failed to persist new job"
            );
            PortabilityError::JobCreationFailed(e.to_string())
        })?;
        info!(job_id = %job_id, "Created job");

        let stored = self.store.find(&job_id).await.inspect_err(|e| {
            error!(
                job_id = %job_id,
                service_id = %export_service,
                data_type = %data_type,
                error = %e,
                "Failed to re-read new job"
            )
        })?;

        stored.ok_or_else(|| {
            error!(
                job_id = %job_id,
                service_id = %export_service,
                data_type = %data_type,
                "Job missing immediately after creation"
            );
            PortabilityError::InternalInvariantViolation(format!(
                "job {job_id} not found after create"
            ))
        })
    }
}

/// Unknown services and unsupported data types are the caller's mistake;
/// duplicate registrations are not.
fn selection_error(field: &'static str, error: PortabilityError) -> PortabilityError {
    match error {
        PortabilityError::ServiceNotFound(_) | PortabilityError::CapabilityNotSupported { .. } => {
            PortabilityError::invalid_argument(field, error.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{ExtensionContext, TransferExtension};
    use crate::models::job::AuthData;
    use crate::services::job_store::InMemoryJobStore;
    use crate::services::registry::testing::FakeExtension;
    use async_trait::async_trait;

    const BASE: &str = "https://portability.example.org/";

    async fn orchestrator_with(
        extensions: Vec<Arc<dyn TransferExtension>>,
    ) -> (ConfigurationOrchestrator, Arc<InMemoryJobStore>) {
        let registry = ExtensionRegistry::initialize_all(extensions, &ExtensionContext::default())
            .await
            .unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let orchestrator = ConfigurationOrchestrator::new(
            store.clone(),
            Arc::new(registry),
            Url::parse(BASE).unwrap(),
        );
        (orchestrator, store)
    }

    async fn default_orchestrator() -> (ConfigurationOrchestrator, Arc<InMemoryJobStore>) {
        orchestrator_with(vec![
            Arc::new(FakeExtension::new("serviceA", &[DataType::Photos, DataType::Contacts])),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await
    }

    fn request(data_type: &str, export_service: &str, import_service: &str) -> ConfigureRequest {
        ConfigureRequest {
            existing_token: None,
            data_type: data_type.to_string(),
            export_service: export_service.to_string(),
            import_service: import_service.to_string(),
        }
    }

    fn invalid_field(err: &PortabilityError) -> Option<&'static str> {
        match err {
            PortabilityError::InvalidArgument { field, .. } => Some(*field),
            _ => None,
        }
    }

    #[tokio::test]
    async fn photos_from_a_to_b_redirects_to_a() {
        let (orchestrator, store) = default_orchestrator().await;

        let outcome = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        assert_eq!(outcome.redirect_url.host_str(), Some("servicea.example.com"));
        assert!(!outcome.reused_existing);

        let id = JobIdCodec.decode(&outcome.job_token).unwrap();
        assert_eq!(id, outcome.job_id);

        let job = store.find(&id).await.unwrap().unwrap();
        assert_eq!(job.data_type(), DataType::Photos);
        assert_eq!(job.export_service(), "serviceA");
        assert_eq!(job.import_service(), "serviceB");
        assert!(job.auth_data(Side::Import).is_none());
        assert!(job.initial_auth_data(Side::Import).is_none());
    }

    #[tokio::test]
    async fn redirect_carries_job_token_as_state() {
        let (orchestrator, _store) = default_orchestrator().await;
        let outcome = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        let state = outcome
            .redirect_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned());
        assert_eq!(state, Some(outcome.job_token));
    }

    #[tokio::test]
    async fn unknown_export_service_persists_nothing() {
        let (orchestrator, store) = default_orchestrator().await;

        let err = orchestrator
            .configure(request("PHOTOS", "unknownX", "serviceB"))
            .await
            .unwrap_err();

        assert_eq!(invalid_field(&err), Some("exportService"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn import_service_without_support_is_rejected() {
        let (orchestrator, store) = default_orchestrator().await;

        let err = orchestrator
            .configure(request("CONTACTS", "serviceA", "serviceB"))
            .await
            .unwrap_err();

        assert_eq!(invalid_field(&err), Some("importService"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_data_type_is_rejected() {
        let (orchestrator, store) = default_orchestrator().await;

        for data_type in ["", "VIDEOS", "photos"] {
            let err = orchestrator
                .configure(request(data_type, "serviceA", "serviceB"))
                .await
                .unwrap_err();
            assert_eq!(invalid_field(&err), Some("dataType"), "{data_type}");
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn same_token_never_creates_a_second_job() {
        let (orchestrator, store) = default_orchestrator().await;
        let first = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        let mut again = request("PHOTOS", "serviceA", "serviceB");
        again.existing_token = Some(first.job_token.clone());
        let second = orchestrator.configure(again.clone()).await.unwrap();
        let third = orchestrator.configure(again).await.unwrap();

        assert!(second.reused_existing && third.reused_existing);
        assert_eq!(second.job_token, first.job_token);
        assert_eq!(third.job_id, first.job_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn mismatched_selection_starts_a_new_job_by_default() {
        let (orchestrator, store) = default_orchestrator().await;
        let first = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        let mut changed = request("PHOTOS", "serviceB", "serviceA");
        changed.existing_token = Some(first.job_token.clone());
        let second = orchestrator.configure(changed).await.unwrap();

        assert!(!second.reused_existing);
        assert_ne!(second.job_token, first.job_token);
        assert_eq!(store.len().await, 2);
        let original = store.find(&first.job_id).await.unwrap().unwrap();
        assert_eq!(original.export_service(), "serviceA");
    }

    #[tokio::test]
    async fn mismatched_selection_can_be_rejected() {
        let (orchestrator, store) = default_orchestrator().await;
        let orchestrator = orchestrator.with_mismatch_policy(SelectionMismatchPolicy::Reject);
        let first = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        let mut changed = request("PHOTOS", "serviceB", "serviceA");
        changed.existing_token = Some(first.job_token);
        let err = orchestrator.configure(changed).await.unwrap_err();

        assert_eq!(invalid_field(&err), Some("selection"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_or_stale_tokens_start_fresh() {
        let (orchestrator, store) = default_orchestrator().await;

        let mut malformed = request("PHOTOS", "serviceA", "serviceB");
        malformed.existing_token = Some("garbage".to_string());
        let outcome = orchestrator.configure(malformed).await.unwrap();
        assert!(!outcome.reused_existing);

        let mut stale = request("PHOTOS", "serviceA", "serviceB");
        stale.existing_token = Some(JobIdCodec.encode_id(&JobId::generate()));
        let outcome = orchestrator.configure(stale).await.unwrap();
        assert!(!outcome.reused_existing);

        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn seed_auth_data_is_stored_before_returning() {
        let (orchestrator, store) = orchestrator_with(vec![
            Arc::new(
                FakeExtension::new("serviceA", &[DataType::Photos]).with_seed("request-token"),
            ),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let outcome = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap();

        let job = store.find(&outcome.job_id).await.unwrap().unwrap();
        assert_eq!(
            job.initial_auth_data(Side::Export).map(AuthData::expose),
            Some("request-token")
        );
        assert!(job.initial_auth_data(Side::Import).is_none());
    }

    #[tokio::test]
    async fn failing_auth_generator_is_unavailable() {
        let (orchestrator, _store) = orchestrator_with(vec![
            Arc::new(FakeExtension::new("serviceA", &[DataType::Photos]).with_failing_auth()),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let err = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortabilityError::AuthGeneratorUnavailable { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn duplicate_export_registration_is_not_a_user_error() {
        let (orchestrator, store) = orchestrator_with(vec![
            Arc::new(FakeExtension::new("dup", &[DataType::Photos])),
            Arc::new(FakeExtension::new("dup", &[DataType::Photos])),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let err = orchestrator
            .configure(request("PHOTOS", "dup", "serviceB"))
            .await
            .unwrap_err();
        assert_eq!(err, PortabilityError::AmbiguousService("dup".to_string()));
        assert!(store.is_empty().await);
    }

    /// Accepts writes but never returns them.
    struct ForgetfulStore;

    #[async_trait]
    impl JobStore for ForgetfulStore {
        async fn create(&self, _job: &Job) -> AppResult<()> {
            Ok(())
        }

        async fn find(&self, _id: &JobId) -> AppResult<Option<Job>> {
            Ok(None)
        }

        async fn update(&self, job: &Job) -> AppResult<()> {
            Err(PortabilityError::NotFound(job.id().to_string()))
        }
    }

    /// Rejects every create as a duplicate.
    struct ConflictingStore;

    #[async_trait]
    impl JobStore for ConflictingStore {
        async fn create(&self, job: &Job) -> AppResult<()> {
            Err(PortabilityError::Conflict(job.id().to_string()))
        }

        async fn find(&self, _id: &JobId) -> AppResult<Option<Job>> {
            Ok(None)
        }

        async fn update(&self, job: &Job) -> AppResult<()> {
            Err(PortabilityError::NotFound(job.id().to_string()))
        }
    }

    /// Creates and finds normally, but every update fails with `update_error`.
    struct ReadOnlyStore {
        inner: InMemoryJobStore,
        update_error: PortabilityError,
    }

    #[async_trait]
    impl JobStore for ReadOnlyStore {
        async fn create(&self, job: &Job) -> AppResult<()> {
            self.inner.create(job).await
        }

        async fn find(&self, id: &JobId) -> AppResult<Option<Job>> {
            self.inner.find(id).await
        }

        async fn update(&self, _job: &Job) -> AppResult<()> {
            Err(self.update_error.clone())
        }
    }

    async fn orchestrator_over(store: Arc<dyn JobStore>) -> ConfigurationOrchestrator {
        orchestrator_over_with(store, FakeExtension::new("serviceA", &[DataType::Photos])).await
    }

    async fn orchestrator_over_with(
        store: Arc<dyn JobStore>,
        export: FakeExtension,
    ) -> ConfigurationOrchestrator {
        let registry = ExtensionRegistry::initialize_all(
            vec![
                Arc::new(export),
                Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
            ],
            &ExtensionContext::default(),
        )
        .await
        .unwrap();
        ConfigurationOrchestrator::new(store, Arc::new(registry), Url::parse(BASE).unwrap())
    }

    #[tokio::test]
    async fn seed_update_on_missing_job_is_invariant_violation() {
        let store = Arc::new(ReadOnlyStore {
            inner: InMemoryJobStore::new(),
            update_error: PortabilityError::NotFound("gone".to_string()),
        });
        let export = FakeExtension::new("serviceA", &[DataType::Photos]).with_seed("verifier");
        let orchestrator = orchestrator_over_with(store.clone(), export).await;

        let err = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortabilityError::InternalInvariantViolation(_)), "{err:?}");
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn seed_update_storage_failure_is_propagated() {
        let storage = PortabilityError::Storage("disk full".to_string());
        let store = Arc::new(ReadOnlyStore {
            inner: InMemoryJobStore::new(),
            update_error: storage.clone(),
        });
        let export = FakeExtension::new("serviceA", &[DataType::Photos]).with_seed("verifier");
        let orchestrator = orchestrator_over_with(store, export).await;

        let err = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap_err();
        assert_eq!(err, storage);
    }

    #[tokio::test]
    async fn unseeded_flow_never_updates_the_job() {
        let store = Arc::new(ReadOnlyStore {
            inner: InMemoryJobStore::new(),
            update_error: PortabilityError::Storage("read only".to_string()),
        });
        let orchestrator = orchestrator_over(store).await;

        assert!(orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn create_conflict_is_job_creation_failure() {
        let orchestrator = orchestrator_over(Arc::new(ConflictingStore)).await;
        let err = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortabilityError::JobCreationFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn job_missing_after_create_is_invariant_violation() {
        let orchestrator = orchestrator_over(Arc::new(ForgetfulStore)).await;
        let err = orchestrator
            .configure(request("PHOTOS", "serviceA", "serviceB"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortabilityError::InternalInvariantViolation(_)), "{err:?}");
    }

    #[test]
    fn mismatch_policy_parses() {
        assert_eq!(
            "replace".parse::<SelectionMismatchPolicy>(),
            Ok(SelectionMismatchPolicy::Replace)
        );
        assert_eq!(
            " Reject ".parse::<SelectionMismatchPolicy>(),
            Ok(SelectionMismatchPolicy::Reject)
        );
        assert!("merge".parse::<SelectionMismatchPolicy>().is_err());
    }
}
