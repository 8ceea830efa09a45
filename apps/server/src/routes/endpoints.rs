use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use tracing::info;

use pingtower_service::database::StoreError;
use pingtower_service::database::models::EndpointId;
use pingtower_service::monitoring::normalize_target;
use pingtower_service::validation::{DEFAULT_CHECK_INTERVAL, validate_check_interval};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    route create_endpoint,
    route list_latest,
    route endpoint_history,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEndpointRequest {
    pub url: String,
    pub check_interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// Register an endpoint for the caller. Re-registering a URL returns the existing endpoint.
#[post("/endpoints")]
pub async fn create_endpoint(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    body: web::Json<CreateEndpointRequest>,
) -> Result<HttpResponse, AppError> {
    let url = normalize_target(&body.url)?;
    let check_interval = body.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL);
    validate_check_interval(check_interval).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let endpoint = match state.registry.add_endpoint(user.0, url.as_str(), check_interval).await {
        Ok(endpoint) => endpoint,
        Err(StoreError::NotFound) => return Err(AppError::NotFound("user")),
        Err(e) => return Err(e.into()),
    };

    info!(user_id = user.0, endpoint_id = endpoint.id, url = %endpoint.url, "Endpoint registered");
    Ok(HttpResponse::Created().json(endpoint))
}

/// Latest probe result for each of the caller's URLs
#[get("/endpoints")]
pub async fn list_latest(user: AuthenticatedUser, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let latest = state.queries.latest_per_endpoint(user.0).await?;
    Ok(HttpResponse::Ok().json(latest))
}

/// Probe history of one of the caller's endpoints, newest first
#[get("/endpoints/{id}/history")]
pub async fn endpoint_history(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
    path: web::Path<EndpointId>,
    params: web::Query<HistoryParams>,
) -> Result<HttpResponse, AppError> {
    let rows = match state.queries.history(user.0, path.into_inner(), params.limit).await {
        Ok(rows) => rows,
        Err(StoreError::NotFound) => return Err(AppError::NotFound("endpoint")),
        Err(e) => return Err(e.into()),
    };
    Ok(HttpResponse::Ok().json(rows))
}
