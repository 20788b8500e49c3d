use crate::error::{AppResult, Capability, PortabilityError};
use crate::models::job::DataType;
use crate::services::configure::{ConfigurationOrchestrator, ConfigureRequest};
use crate::services::registry::ExtensionRegistry;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct AppState {
    pub orchestrator: ConfigurationOrchestrator,
    pub registry: Arc<ExtensionRegistry>,
    pub job_cookie_name: String,
    pub secure_cookies: bool,
}

#[derive(Deserialize, Debug)]
pub struct ConfigureForm {
    #[serde(rename = "dataType", default)]
    pub data_type: String,
    #[serde(rename = "exportService", default)]
    pub export_service: String,
    #[serde(rename = "importService", default)]
    pub import_service: String,
}

#[derive(Deserialize, Debug)]
pub struct ServicesQuery {
    #[serde(rename = "dataType")]
    pub data_type: String,
}

#[derive(Serialize, Debug)]
pub struct ServicesResponse {
    pub data_type: DataType,
    pub export_services: Vec<String>,
    pub import_services: Vec<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(configure).service(list_services);
}

/// Records the selection and sends the browser to the export service's
/// authorization page.
#[post("/configure")]
#[instrument(skip(data, req, form))]
async fn configure(
    data: web::Data<Arc<AppState>>,
    req: HttpRequest,
    form: web::Form<ConfigureForm>,
) -> AppResult<HttpResponse> {
    let existing_token = req
        .cookie(&data.job_cookie_name)
        .map(|cookie| cookie.value().to_string());
    debug!(has_token = existing_token.is_some(), "Configure request received");

    let request = ConfigureRequest {
        existing_token,
        data_type: normalize_param(&form.data_type),
        export_service: normalize_param(&form.export_service),
        import_service: normalize_param(&form.import_service),
    };

    let outcome = data.orchestrator.configure(request).await?;

    let cookie = Cookie::build(data.job_cookie_name.clone(), outcome.job_token)
        .path("/")
        .http_only(true)
        .secure(data.secure_cookies)
        // Lax so the cookie survives the provider redirecting back to us.
        .same_site(SameSite::Lax)
        .finish();

    info!(reused = outcome.reused_existing, "Issuing authorization redirect");
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, outcome.redirect_url.as_str()))
        .cookie(cookie)
        .finish())
}

#[get("/services")]
async fn list_services(
    data: web::Data<Arc<AppState>>,
    query: web::Query<ServicesQuery>,
) -> AppResult<impl Responder> {
    let data_type = normalize_param(&query.data_type)
        .parse::<DataType>()
        .map_err(|e| PortabilityError::invalid_argument("dataType", e.to_string()))?;

    Ok(web::Json(ServicesResponse {
        data_type,
        export_services: data.registry.services_supporting(Capability::Export, data_type),
        import_services: data.registry.services_supporting(Capability::Import, data_type),
    }))
}

/// Some form frameworks submit option values as `<index>: <value>`; keep the value.
fn normalize_param(value: &str) -> String {
    value
        .split_once(':')
        .map_or(value, |(_, rest)| rest)
        .trim()
        .to_string()
}
