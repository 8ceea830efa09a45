use actix_web::web::ServiceConfig;

mod endpoints;
mod health;
mod users;

pub fn routes(cfg: &mut ServiceConfig) {
    health::routes(cfg);
    users::routes(cfg);
    endpoints::routes(cfg);
}
