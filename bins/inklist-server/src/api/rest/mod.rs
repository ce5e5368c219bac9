//! REST API: routing, handlers, middleware and wire types.

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod types;

pub use handlers::AppState;
pub use routes::create_router;
