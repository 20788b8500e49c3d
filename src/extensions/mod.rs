//! Contract between the core and pluggable transfer extensions.
//!
//! An extension is bound to one service id and hands out an exporter, an
//! importer and an auth-data generator per data type. Any of the three may be
//! missing for a given data type.

pub mod oauth;

use crate::models::auth::AuthFlowInitiator;
use crate::models::job::{AuthData, DataType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub use oauth::{OAuth2Extension, OAuthServiceConfig};

/// Failure reported by an extension. The core maps it onto its own taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ExtensionError(pub String);

impl ExtensionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Settings shared with every extension during initialization.
#[derive(Debug, Clone, Default)]
pub struct ExtensionContext {
    settings: HashMap<String, String>,
}

impl ExtensionContext {
    pub fn new(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn setting_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.setting(key).unwrap_or(default)
    }
}

/// One page of exported items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportPage {
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Reads data out of a service.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(
        &self,
        data_type: DataType,
        auth_data: &AuthData,
        page_token: Option<&str>,
    ) -> Result<ExportPage, ExtensionError>;
}

/// Writes data into a service.
#[async_trait]
pub trait Importer: Send + Sync {
    async fn import(
        &self,
        data_type: DataType,
        auth_data: &AuthData,
        items: &[serde_json::Value],
    ) -> Result<(), ExtensionError>;
}

/// Starts the authorization handshake with a service.
#[async_trait]
pub trait OnlineAuthDataGenerator: Send + Sync {
    /// `callback_base_url` is where the service should send the user back to;
    /// `job_token` travels through the provider so the callback can find the job.
    async fn generate_auth_url(
        &self,
        callback_base_url: &Url,
        job_token: &str,
    ) -> Result<AuthFlowInitiator, ExtensionError>;
}

#[async_trait]
pub trait TransferExtension: Send + Sync {
    fn service_id(&self) -> &str;

    /// Called exactly once, before any capability is requested.
    async fn initialize(&self, context: &ExtensionContext) -> Result<(), ExtensionError>;

    fn exporter(&self, data_type: DataType) -> Option<Arc<dyn Exporter>>;

    fn importer(&self, data_type: DataType) -> Option<Arc<dyn Importer>>;

    fn auth_generator(&self, data_type: DataType) -> Option<Arc<dyn OnlineAuthDataGenerator>>;
}
