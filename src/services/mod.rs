pub mod configure;
pub mod dispatcher;
pub mod job_codec;
pub mod job_repository;
pub mod job_store;
pub mod registry;

pub use configure::{
    ConfigurationOrchestrator, ConfigureOutcome, ConfigureRequest, SelectionMismatchPolicy,
};
pub use dispatcher::{
    DataCopier, DispatchFailure, InMemoryDataCopier, Participants, WorkerDispatcher,
};
pub use job_codec::JobIdCodec;
pub use job_repository::JobRepository;
pub use job_store::{InMemoryJobStore, JobStore};
pub use registry::ExtensionRegistry;
