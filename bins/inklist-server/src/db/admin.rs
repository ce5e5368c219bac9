//! Admin queries: session moderation, bans, roles, users.

use sqlx::error::ErrorKind;

use crate::db::models::{HostBanRow, RoleRow, SessionRow, UserAuthRow, UserListRow};
use crate::db::{Store, unix_now};
use crate::error::{ApiError, Result};

/// Map a unique-constraint failure to a caller-visible conflict.
fn on_unique(err: sqlx::Error, conflict: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if matches!(db.kind(), ErrorKind::UniqueViolation) => {
            ApiError::Conflict(conflict.to_string())
        }
        _ => ApiError::Database(err),
    }
}

impl Store {
    /// Every session row, newest last, for the moderation view.
    pub async fn admin_query_sessions(&self) -> Result<Vec<SessionRow>> {
        Ok(
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions ORDER BY id ASC")
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// Bulk (un)list sessions. Returns only the ids whose row was actually
    /// updated; unknown ids are silently dropped from the result.
    pub async fn admin_update_sessions(
        &self,
        ids: &[i64],
        unlisted: bool,
        unlist_reason: &str,
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool().begin().await?;
        let mut updated = Vec::new();

        for &id in ids {
            let result = sqlx::query(
                "UPDATE sessions SET unlisted = ?, unlist_reason = ? WHERE id = ?",
            )
            .bind(unlisted)
            .bind(unlist_reason)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                updated.push(id);
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    // Host bans

    pub async fn admin_query_host_bans(&self) -> Result<Vec<HostBanRow>> {
        Ok(
            sqlx::query_as::<_, HostBanRow>("SELECT * FROM hostbans ORDER BY id ASC")
                .fetch_all(self.pool())
                .await?,
        )
    }

    pub async fn admin_create_host_ban(
        &self,
        host: &str,
        expires: Option<i64>,
        notes: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO hostbans (host, expires, notes) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(host)
        .bind(expires)
        .bind(notes)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    pub async fn admin_update_host_ban(
        &self,
        id: i64,
        host: &str,
        expires: Option<i64>,
        notes: &str,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE hostbans SET host = ?, expires = ?, notes = ? WHERE id = ?")
                .bind(host)
                .bind(expires)
                .bind(notes)
                .bind(id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn admin_delete_host_ban(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM hostbans WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Roles

    pub async fn admin_query_roles(&self) -> Result<Vec<RoleRow>> {
        Ok(
            sqlx::query_as::<_, RoleRow>("SELECT * FROM roles ORDER BY id ASC")
                .fetch_all(self.pool())
                .await?,
        )
    }

    pub async fn admin_create_role(
        &self,
        name: &str,
        admin: bool,
        access: [i64; 4],
    ) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO roles \
             (name, admin, access_sessions, access_hostbans, access_roles, access_users) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(admin)
        .bind(access[0])
        .bind(access[1])
        .bind(access[2])
        .bind(access[3])
        .fetch_one(self.pool())
        .await
        .map_err(|err| on_unique(err, "Role name already in use"))
    }

    pub async fn admin_update_role(
        &self,
        id: i64,
        name: &str,
        admin: bool,
        access: [i64; 4],
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE roles SET name = ?, admin = ?, access_sessions = ?, \
             access_hostbans = ?, access_roles = ?, access_users = ? WHERE id = ?",
        )
        .bind(name)
        .bind(admin)
        .bind(access[0])
        .bind(access[1])
        .bind(access[2])
        .bind(access[3])
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|err| on_unique(err, "Role name already in use"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a role. Refused while any user still references it.
    pub async fn admin_delete_role(&self, id: i64) -> Result<bool> {
        let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role_id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        if in_use > 0 {
            return Err(ApiError::Conflict("Role is in use".to_string()));
        }

        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|err| match &err {
                // The FK backstops the count check above against races.
                sqlx::Error::Database(db)
                    if matches!(db.kind(), ErrorKind::ForeignKeyViolation) =>
                {
                    ApiError::Conflict("Role is in use".to_string())
                }
                _ => ApiError::Database(err),
            })?;
        Ok(result.rows_affected() > 0)
    }

    // Users

    pub async fn admin_query_users(&self) -> Result<Vec<UserListRow>> {
        Ok(sqlx::query_as::<_, UserListRow>(
            "SELECT users.id AS id, users.name AS name, roles.name AS role \
             FROM users JOIN roles ON roles.id = users.role_id ORDER BY users.id ASC",
        )
        .fetch_all(self.pool())
        .await?)
    }

    /// Look up a user with its role's access levels, for Basic-auth checks.
    pub async fn admin_query_user_auth(&self, name: &str) -> Result<Option<UserAuthRow>> {
        Ok(sqlx::query_as::<_, UserAuthRow>(
            "SELECT users.id AS id, users.name AS name, users.password_hash AS password_hash, \
             roles.admin AS admin, roles.access_sessions AS access_sessions, \
             roles.access_hostbans AS access_hostbans, roles.access_roles AS access_roles, \
             roles.access_users AS access_users \
             FROM users JOIN roles ON roles.id = users.role_id WHERE users.name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn admin_create_user(
        &self,
        name: &str,
        password_hash: &str,
        role_id: i64,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO users (name, password_hash, role_id) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(password_hash)
        .bind(role_id)
        .fetch_one(self.pool())
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if matches!(db.kind(), ErrorKind::ForeignKeyViolation) => {
                ApiError::validation("role", "no such role")
            }
            _ => on_unique(err, "User name already in use"),
        })
    }

    pub async fn admin_update_user(
        &self,
        id: i64,
        name: &str,
        password_hash: Option<&str>,
        role_id: i64,
    ) -> Result<bool> {
        let result = match password_hash {
            Some(hash) => {
                sqlx::query(
                    "UPDATE users SET name = ?, password_hash = ?, role_id = ? WHERE id = ?",
                )
                .bind(name)
                .bind(hash)
                .bind(role_id)
                .bind(id)
                .execute(self.pool())
                .await
            }
            None => {
                sqlx::query("UPDATE users SET name = ?, role_id = ? WHERE id = ?")
                    .bind(name)
                    .bind(role_id)
                    .bind(id)
                    .execute(self.pool())
                    .await
            }
        }
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if matches!(db.kind(), ErrorKind::ForeignKeyViolation) => {
                ApiError::validation("role", "no such role")
            }
            _ => on_unique(err, "User name already in use"),
        })?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn admin_update_user_password(&self, id: i64, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn admin_delete_user(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// True if the session has gone stale rather than being unlisted; used by
    /// the admin view.
    pub fn is_timed_out(&self, row: &SessionRow) -> bool {
        !row.unlisted && unix_now() - row.last_active > self.timeout_secs()
    }
}
