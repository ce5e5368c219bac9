//! Admin authentication and authorization.
//!
//! Every `/admin/` request passes Basic auth: credentials are matched first
//! against the static operator pair from the environment, then against the
//! user table (bcrypt). A successful login attaches an [`AdminContext`] with
//! the user's per-permission access levels.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use tracing::error;

use crate::api::rest::handlers::AppState;
use crate::error::{ApiError, Result};

pub const ACCESS_NONE: i64 = 0;
pub const ACCESS_VIEW: i64 = 1;
pub const ACCESS_MANAGE: i64 = 2;

/// The four permission slots of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    Sessions = 0,
    HostBans = 1,
    Roles = 2,
    Users = 3,
}

/// Authenticated admin identity. The static operator gets `user_id` 0 and the
/// admin flag.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub user_id: i64,
    pub user_name: String,
    pub admin: bool,
    pub access: [i64; 4],
}

impl AdminContext {
    fn operator(name: String) -> Self {
        Self {
            user_id: 0,
            user_name: name,
            admin: true,
            access: [ACCESS_NONE; 4],
        }
    }

    /// Access level for a permission, with roles and users clamped to view:
    /// only the built-in admin may manage them.
    pub fn clamped_access(&self, perm: Perm) -> i64 {
        let access = self.access[perm as usize];
        match perm {
            Perm::Roles | Perm::Users => access.min(ACCESS_VIEW),
            _ => access,
        }
    }

    /// Authorize an operation that needs `level` on `perm`.
    pub fn require(&self, perm: Perm, level: i64) -> Result<()> {
        if self.admin || self.clamped_access(perm) >= level {
            Ok(())
        } else {
            Err(ApiError::Forbidden("permission denied".to_string()))
        }
    }
}

/// Basic-auth middleware for the admin router.
pub fn admin_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
    Box::pin(async move {
        let result: std::result::Result<Option<AdminContext>, ApiError> =
            check_credentials(&state, &req).await;
        match result {
            Ok(Some(ctx)) => {
                req.extensions_mut().insert(ctx);
                next.run(req).await
            }
            Ok(None) => ApiError::Unauthorized.into_response(),
            Err(err) => {
                error!("admin auth error: {err}");
                ApiError::Internal("admin auth failed".to_string()).into_response()
            }
        }
    })
}

async fn check_credentials(state: &AppState, req: &Request) -> Result<Option<AdminContext>> {
    let Some((username, password)) = basic_credentials(req) else {
        return Ok(None);
    };
    if username.is_empty() || password.is_empty() {
        return Ok(None);
    }

    if let (Some(operator), Some(operator_pass)) = (&state.cfg.admin_user, &state.cfg.admin_pass)
        && username == *operator
        && password == *operator_pass
    {
        return Ok(Some(AdminContext::operator(username)));
    }

    let Some(store) = &state.store else {
        return Ok(None);
    };
    let Some(user) = store.admin_query_user_auth(&username).await? else {
        return Ok(None);
    };
    if !check_password(&password, &user.password_hash) {
        return Ok(None);
    }

    Ok(Some(AdminContext {
        user_id: user.id,
        user_name: user.name,
        admin: user.admin,
        access: [
            user.access_sessions,
            user.access_hostbans,
            user.access_roles,
            user.access_users,
        ],
    }))
}

fn basic_credentials(req: &Request) -> Option<(String, String)> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(header).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Hash a password for storage: the raw bcrypt output, base64 encoded without
/// padding.
pub fn hash_password(password: &str) -> Result<String> {
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;
    Ok(STANDARD_NO_PAD.encode(hash.as_bytes()))
}

/// Verify a password against a stored hash. Any decoding failure is just a
/// mismatch.
pub fn check_password(password: &str, stored: &str) -> bool {
    let Ok(decoded) = STANDARD_NO_PAD.decode(stored) else {
        return false;
    };
    let Ok(hash) = String::from_utf8(decoded) else {
        return false;
    };
    bcrypt::verify(password, &hash).unwrap_or(false)
}
