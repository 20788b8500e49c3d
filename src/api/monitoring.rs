use crate::error::{AppResult, PortabilityError};
use crate::monitoring::HealthChecker;
use actix_web::{get, web, Responder};
use std::sync::Arc;

pub struct MonitoringState {
    pub health_checker: HealthChecker,
}

pub fn configure_monitoring_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check).service(liveness_check);
}

#[get("/health")]
async fn health_check(data: web::Data<Arc<MonitoringState>>) -> AppResult<impl Responder> {
    let health_status = data.health_checker.get_health_status().await;

    match health_status.status.as_str() {
        "healthy" => Ok(web::Json(health_status)),
        _ => Err(PortabilityError::Unavailable(format!(
            "health status is {}",
            health_status.status
        ))),
    }
}

#[get("/health/live")]
async fn liveness_check() -> AppResult<impl Responder> {
    Ok(web::Json(serde_json::json!({ "status": "alive" })))
}
