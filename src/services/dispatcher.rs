use crate::error::{AppResult, PortabilityError};
use crate::extensions::{Exporter, Importer};
use crate::models::job::{DataType, Job, Side};
use crate::services::job_codec::JobIdCodec;
use crate::services::registry::ExtensionRegistry;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// The exporter and importer a job run will use.
pub struct Participants {
    pub exporter: Arc<dyn Exporter>,
    pub importer: Arc<dyn Importer>,
}

/// A participant could not be resolved. Fatal to the job run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub side: Side,
    pub service_id: String,
    pub data_type: DataType,
    pub cause: PortabilityError,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot resolve {} participant '{}' for {}: {}",
            self.side, self.service_id, self.data_type, self.cause
        )
    }
}

impl std::error::Error for DispatchFailure {}

/// Copy engine boundary: moves everything the exporter yields into the importer.
#[async_trait]
pub trait DataCopier: Send + Sync {
    async fn copy(&self, job: &Job, participants: &Participants) -> AppResult<()>;
}

/// Pages through the exporter and hands each page to the importer, in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryDataCopier;

#[async_trait]
impl DataCopier for InMemoryDataCopier {
    async fn copy(&self, job: &Job, participants: &Participants) -> AppResult<()> {
        let failed = |reason: String| PortabilityError::TransferFailed {
            job_id: job.id().to_string(),
            reason,
        };

        let export_auth = job
            .auth_data(Side::Export)
            .ok_or_else(|| failed("export authorization has not completed".to_string()))?;
        let import_auth = job
            .auth_data(Side::Import)
            .ok_or_else(|| failed("import authorization has not completed".to_string()))?;

        let mut page_token: Option<String> = None;
        let mut copied = 0usize;
        loop {
            let page = participants
                .exporter
                .export(job.data_type(), export_auth, page_token.as_deref())
                .await
                .map_err(|e| failed(format!("export failed: {e}")))?;

            if !page.items.is_empty() {
                participants
                    .importer
                    .import(job.data_type(), import_auth, &page.items)
                    .await
                    .map_err(|e| failed(format!("import failed: {e}")))?;
                copied += page.items.len();
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(job_id = %job.id(), items = copied, "Copy finished");
        Ok(())
    }
}

/// Resolves the participants for a job and hands them to the copy engine.
pub struct WorkerDispatcher {
    registry: Arc<ExtensionRegistry>,
}

impl WorkerDispatcher {
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self { registry }
    }

    pub fn resolve_participants(&self, job: &Job) -> Result<Participants, DispatchFailure> {
        let data_type = job.data_type();
        let failure = |side: Side, cause: PortabilityError| {
            let failure = DispatchFailure {
                side,
                service_id: job.service(side).to_string(),
                data_type,
                cause,
            };
            error!(
                job_id = %job.id(),
                side = %side,
                service_id = %failure.service_id,
                data_type = %data_type,
                error = %failure.cause,
                "Cannot resolve job participant"
            );
            failure
        };

        let exporter = self
            .registry
            .get_exporter(job.export_service(), data_type)
            .map_err(|e| failure(Side::Export, e))?;
        let importer = self
            .registry
            .get_importer(job.import_service(), data_type)
            .map_err(|e| failure(Side::Import, e))?;

        Ok(Participants { exporter, importer })
    }

    #[instrument(skip(self, job, copier), fields(job_token = %JobIdCodec.encode(job)))]
    pub async fn dispatch(&self, job: &Job, copier: &dyn DataCopier) -> AppResult<()> {
        let participants = self
            .resolve_participants(job)
            .map_err(|failure| PortabilityError::TransferFailed {
                job_id: job.id().to_string(),
                reason: failure.to_string(),
            })?;

        info!(job_id = %job.id(), data_type = %job.data_type(), "Handing job to copy engine");
        copier.copy(job, &participants).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Capability;
    use crate::extensions::{ExportPage, ExtensionContext, TransferExtension};
    use crate::models::job::AuthData;
    use crate::services::registry::testing::FakeExtension;
    use serde_json::json;

    async fn dispatcher(extensions: Vec<Arc<dyn TransferExtension>>) -> WorkerDispatcher {
        let registry = ExtensionRegistry::initialize_all(extensions, &ExtensionContext::default())
            .await
            .unwrap();
        WorkerDispatcher::new(Arc::new(registry))
    }

    fn authorized_job(data_type: DataType, export_service: &str, import_service: &str) -> Job {
        let mut job = Job::new(data_type, export_service, import_service);
        job.set_auth_data(Side::Export, AuthData::new("export-token"));
        job.set_auth_data(Side::Import, AuthData::new("import-token"));
        job
    }

    #[tokio::test]
    async fn resolves_both_participants() {
        let dispatcher = dispatcher(vec![
            Arc::new(FakeExtension::new("serviceA", &[DataType::Photos])),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let job = Job::new(DataType::Photos, "serviceA", "serviceB");
        assert!(dispatcher.resolve_participants(&job).is_ok());
    }

    #[tokio::test]
    async fn missing_import_service_names_side_service_and_type() {
        let dispatcher =
            dispatcher(vec![Arc::new(FakeExtension::new("serviceA", &[DataType::Photos]))]).await;

        let job = Job::new(DataType::Photos, "serviceA", "gone");
        let failure = dispatcher.resolve_participants(&job).err().unwrap();

        assert_eq!(failure.side, Side::Import);
        assert_eq!(failure.service_id, "gone");
        assert_eq!(failure.data_type, DataType::Photos);
        assert_eq!(failure.cause, PortabilityError::ServiceNotFound("gone".to_string()));
    }

    #[tokio::test]
    async fn ambiguous_and_unsupported_are_surfaced() {
        let dispatcher = dispatcher(vec![
            Arc::new(FakeExtension::new("dup", &[DataType::Photos])),
            Arc::new(FakeExtension::new("dup", &[DataType::Photos])),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let failure = dispatcher
            .resolve_participants(&Job::new(DataType::Photos, "dup", "serviceB"))
            .err()
            .unwrap();
        assert_eq!(failure.side, Side::Export);
        assert_eq!(failure.cause, PortabilityError::AmbiguousService("dup".to_string()));

        let failure = dispatcher
            .resolve_participants(&Job::new(DataType::Mail, "serviceB", "serviceB"))
            .err()
            .unwrap();
        assert_eq!(
            failure.cause,
            PortabilityError::CapabilityNotSupported {
                service_id: "serviceB".to_string(),
                data_type: DataType::Mail,
                capability: Capability::Export,
            }
        );
    }

    #[tokio::test]
    async fn dispatch_copies_every_page() {
        let source = FakeExtension::new("serviceA", &[DataType::Contacts]).with_pages(vec![
            ExportPage {
                items: vec![json!({"name": "Ada"}), json!({"name": "Grace"})],
                next_page_token: Some("1".to_string()),
            },
            ExportPage {
                items: vec![json!({"name": "Barbara"})],
                next_page_token: None,
            },
        ]);
        let sink = Arc::new(FakeExtension::new("serviceB", &[DataType::Contacts]));
        let dispatcher = dispatcher(vec![
            Arc::new(source) as Arc<dyn TransferExtension>,
            sink.clone() as Arc<dyn TransferExtension>,
        ])
        .await;

        let job = authorized_job(DataType::Contacts, "serviceA", "serviceB");
        dispatcher.dispatch(&job, &InMemoryDataCopier).await.unwrap();

        let received = sink.importer.received.lock().unwrap().clone();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2], json!({"name": "Barbara"}));
    }

    #[tokio::test]
    async fn dispatch_without_final_auth_fails() {
        let dispatcher = dispatcher(vec![
            Arc::new(FakeExtension::new("serviceA", &[DataType::Photos])),
            Arc::new(FakeExtension::new("serviceB", &[DataType::Photos])),
        ])
        .await;

        let job = Job::new(DataType::Photos, "serviceA", "serviceB");
        let err = dispatcher.dispatch(&job, &InMemoryDataCopier).await.unwrap_err();
        assert!(matches!(err, PortabilityError::TransferFailed { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn dispatch_with_unresolvable_participant_fails() {
        let dispatcher =
            dispatcher(vec![Arc::new(FakeExtension::new("serviceA", &[DataType::Photos]))]).await;

        let job = authorized_job(DataType::Photos, "serviceA", "gone");
        let err = dispatcher.dispatch(&job, &InMemoryDataCopier).await.unwrap_err();
        match err {
            PortabilityError::TransferFailed { reason, .. } => assert!(reason.contains("gone")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
