use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};

use pingtower_service::database::models::UserId;

use crate::error::AppError;

pub const USER_HEADER: &str = "X-User-Id";

/// Caller identity taken from the `X-User-Id` header.
///
/// Authentication happens upstream; this only trusts what the gateway forwarded.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .headers()
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .filter(|id| *id > 0)
            .map(AuthenticatedUser)
            .ok_or(AppError::Unauthorized);
        ready(user)
    }
}
