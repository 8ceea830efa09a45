use actix_web::{HttpResponse, post, web};
use serde::{Deserialize, Serialize};
use tracing::info;

use pingtower_service::database::StoreError;
use pingtower_service::database::models::UserId;
use pingtower_service::validation::is_valid_email;

use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    route create_user,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: UserId,
}

/// Register a user by contact email
#[post("/users")]
pub async fn create_user(
    state: web::Data<AppState>,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, AppError> {
    let email = body.email.trim();
    if !is_valid_email(email) {
        return Err(AppError::BadRequest(format!("invalid email address: {email:?}")));
    }

    let user = match state.registry.create_user(email).await {
        Ok(user) => user,
        Err(StoreError::Conflict) => return Err(AppError::Conflict(format!("{email} is already registered"))),
        Err(e) => return Err(e.into()),
    };

    info!(user_id = user.id, "User registered");
    Ok(HttpResponse::Created().json(CreateUserResponse { id: user.id }))
}
