use crate::models::job::AuthData;
use url::Url;

/// Where to send the user to authorize, plus anything that must be stored first.
#[derive(Debug, Clone)]
pub struct AuthFlowInitiator {
    pub auth_url: Url,
    pub initial_auth_data: Option<AuthData>,
}

impl AuthFlowInitiator {
    pub fn new(auth_url: Url) -> Self {
        Self {
            auth_url,
            initial_auth_data: None,
        }
    }

    pub fn with_initial_auth_data(mut self, data: AuthData) -> Self {
        self.initial_auth_data = Some(data);
        self
    }
}
