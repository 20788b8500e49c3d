pub mod auth;
pub mod job;

pub use auth::AuthFlowInitiator;
pub use job::{AuthData, DataType, Job, JobId, Side};
