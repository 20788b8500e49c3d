//! Job identity and transfer-extension core for moving personal data between
//! services.
//!
//! A configuration request becomes a durable [`models::Job`] addressed by an
//! opaque token, the export service's auth flow is started through the
//! [`services::ExtensionRegistry`], and a worker later resolves the exporter and
//! importer for the job through the same registry.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod extensions;
pub mod models;
pub mod monitoring;
pub mod services;
