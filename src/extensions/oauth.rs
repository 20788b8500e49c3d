//! Generic OAuth2 authorization-code extension driven by configuration.
//!
//! Each configured service gets one `OAuth2Extension`. Authorization uses PKCE
//! (`plain`); the verifier is handed back as initial auth data so the callback
//! handler can finish the exchange. Export and import speak paged JSON against
//! `<api_base_url>/<data type>`.

use crate::extensions::{
    ExportPage, ExtensionContext, ExtensionError, Exporter, Importer, OnlineAuthDataGenerator,
    TransferExtension,
};
use crate::models::auth::AuthFlowInitiator;
use crate::models::job::{AuthData, DataType};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthServiceConfig {
    pub service_id: String,
    pub authorization_endpoint: Url,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub api_base_url: Url,
    #[serde(default)]
    pub export_types: Vec<DataType>,
    #[serde(default)]
    pub import_types: Vec<DataType>,
}

pub struct OAuth2Extension {
    config: Arc<OAuthServiceConfig>,
    client: Arc<OnceLock<reqwest::Client>>,
}

impl OAuth2Extension {
    pub fn new(config: OAuthServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: Arc::new(OnceLock::new()),
        }
    }

    fn api(&self) -> JsonApi {
        JsonApi {
            config: self.config.clone(),
            client: self.client.clone(),
        }
    }

    fn supports_auth(&self, data_type: DataType) -> bool {
        self.config.export_types.contains(&data_type)
            || self.config.import_types.contains(&data_type)
    }
}

#[async_trait]
impl TransferExtension for OAuth2Extension {
    fn service_id(&self) -> &str {
        &self.config.service_id
    }

    async fn initialize(&self, context: &ExtensionContext) -> Result<(), ExtensionError> {
        if self.config.client_id.trim().is_empty() {
            return Err(ExtensionError::new("client_id must not be empty"));
        }

        let user_agent_key = format!("{}.user_agent", self.config.service_id.to_lowercase());
        let default_agent = concat!("portability/", env!("CARGO_PKG_VERSION"));
        let user_agent = context.setting_or(&user_agent_key, default_agent);
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ExtensionError::new(format!("failed to build HTTP client: {e}")))?;

        self.client
            .set(client)
            .map_err(|_| ExtensionError::new("extension initialized twice"))?;
        debug!(service_id = %self.config.service_id, "OAuth2 extension ready");
        Ok(())
    }

    fn exporter(&self, data_type: DataType) -> Option<Arc<dyn Exporter>> {
        self.config
            .export_types
            .contains(&data_type)
            .then(|| Arc::new(self.api()) as Arc<dyn Exporter>)
    }

    fn importer(&self, data_type: DataType) -> Option<Arc<dyn Importer>> {
        self.config
            .import_types
            .contains(&data_type)
            .then(|| Arc::new(self.api()) as Arc<dyn Importer>)
    }

    fn auth_generator(&self, data_type: DataType) -> Option<Arc<dyn OnlineAuthDataGenerator>> {
        self.supports_auth(data_type).then(|| {
            Arc::new(AuthorizationCodeFlow {
                config: self.config.clone(),
            }) as Arc<dyn OnlineAuthDataGenerator>
        })
    }
}

struct AuthorizationCodeFlow {
    config: Arc<OAuthServiceConfig>,
}

#[async_trait]
impl OnlineAuthDataGenerator for AuthorizationCodeFlow {
    async fn generate_auth_url(
        &self,
        callback_base_url: &Url,
        job_token: &str,
    ) -> Result<AuthFlowInitiator, ExtensionError> {
        let redirect_uri = as_directory(callback_base_url)
            .join(&format!("callback/{}", self.config.service_id))
            .map_err(|e| ExtensionError::new(format!("invalid callback URL: {e}")))?;

        // 64 characters from the unreserved set, inside the 43..=128 PKCE bounds.
        let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

        let mut auth_url = self.config.authorization_endpoint.clone();
        {
            let mut query = auth_url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("state", job_token)
                .append_pair("code_challenge", &verifier)
                .append_pair("code_challenge_method", "plain");
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
        }

        Ok(AuthFlowInitiator::new(auth_url).with_initial_auth_data(AuthData::new(verifier)))
    }
}

/// `join` replaces the last path segment unless the base ends in `/`.
fn as_directory(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Paged JSON export/import against the service's API.
struct JsonApi {
    config: Arc<OAuthServiceConfig>,
    client: Arc<OnceLock<reqwest::Client>>,
}

impl JsonApi {
    fn client(&self) -> Result<&reqwest::Client, ExtensionError> {
        self.client
            .get()
            .ok_or_else(|| ExtensionError::new("extension used before initialization"))
    }

    fn collection_url(&self, data_type: DataType) -> Result<Url, ExtensionError> {
        as_directory(&self.config.api_base_url)
            .join(&data_type.as_str().to_lowercase())
            .map_err(|e| ExtensionError::new(format!("invalid API URL: {e}")))
    }
}

#[async_trait]
impl Exporter for JsonApi {
    async fn export(
        &self,
        data_type: DataType,
        auth_data: &AuthData,
        page_token: Option<&str>,
    ) -> Result<ExportPage, ExtensionError> {
        let mut url = self.collection_url(data_type)?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("page_token", token);
        }

        let response = self
            .client()?
            .get(url)
            .bearer_auth(auth_data.expose())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ExtensionError::new(format!("export request failed: {e}")))?;

        response
            .json::<ExportPage>()
            .await
            .map_err(|e| ExtensionError::new(format!("malformed export page: {e}")))
    }
}

#[async_trait]
impl Importer for JsonApi {
    async fn import(
        &self,
        data_type: DataType,
        auth_data: &AuthData,
        items: &[serde_json::Value],
    ) -> Result<(), ExtensionError> {
        let url = self.collection_url(data_type)?;
        self.client()?
            .post(url)
            .bearer_auth(auth_data.expose())
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ExtensionError::new(format!("import request failed: {e}")))?;
        Ok(())
    }
}
