//! Router assembly.

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::AppState;
use super::{admin, auth, handlers, middleware};

/// Build the full application router: the public surface, the admin API when
/// enabled, and the shared middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cfg = state.cfg.clone();

    let public = Router::new()
        .route("/", get(handlers::root))
        .route(
            "/sessions/",
            get(handlers::session_list)
                .post(handlers::announce_session)
                .put(handlers::batch_refresh),
        )
        .route(
            "/sessions/{id}/",
            put(handlers::refresh_session).delete(handlers::delete_session),
        )
        .route("/join/{code}/", get(handlers::join_by_code))
        .layer(from_fn_with_state(state.clone(), middleware::public_gate))
        .layer(cors_layer(&cfg.allow_origins, vec![Method::GET], false));

    let mut app = public;

    if cfg.enable_admin_api && !cfg.read_only() {
        let admin_router = Router::new()
            .route("/admin/", get(admin::admin_root))
            .route(
                "/admin/sessions/",
                get(admin::admin_session_list).put(admin::admin_update_sessions),
            )
            .route(
                "/admin/bans/",
                get(admin::admin_ban_list).post(admin::admin_ban_create),
            )
            .route(
                "/admin/bans/{id}/",
                put(admin::admin_ban_update).delete(admin::admin_ban_delete),
            )
            .route(
                "/admin/roles/",
                get(admin::admin_role_list).post(admin::admin_role_create),
            )
            .route(
                "/admin/roles/{id}/",
                put(admin::admin_role_update).delete(admin::admin_role_delete),
            )
            .route(
                "/admin/users/",
                get(admin::admin_user_list).post(admin::admin_user_create),
            )
            .route("/admin/users/self/password/", put(admin::admin_self_password))
            .route(
                "/admin/users/{id}/",
                put(admin::admin_user_update).delete(admin::admin_user_delete),
            )
            .layer(from_fn_with_state(state.clone(), auth::admin_auth))
            .layer(cors_layer(
                &cfg.allow_origins,
                vec![Method::GET, Method::POST, Method::PUT, Method::DELETE],
                true,
            ));
        app = app.merge(admin_router);
    }

    let mut app = app
        .layer(from_fn_with_state(state.clone(), middleware::resolve_client_ip))
        .layer(from_fn(middleware::normalize_slashes))
        .with_state(state);

    if cfg.log_requests {
        app = app.layer(TraceLayer::new_for_http());
    }

    app
}

fn cors_layer(origins: &[String], methods: Vec<Method>, with_headers: bool) -> CorsLayer {
    let mut layer = CorsLayer::new().allow_methods(methods);

    if origins.iter().any(|origin| origin == "*") {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }

    if with_headers {
        layer = layer.allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    }

    layer
}

