//! Session registry queries.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::info;

use crate::db::models::{NewSession, QueryOptions, RefreshFields, SessionRow, encode_usernames};
use crate::db::{Store, unix_now};
use crate::error::{ApiError, Result};
use crate::validation::is_host_in_list;

/// Rows older than this are purged by the daily sweep, whatever their state.
const PURGE_AGE_SECS: i64 = 24 * 60 * 60;

/// Generate a fresh listing secret: 16 random bytes, URL-safe base64.
fn generate_update_key() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

impl Store {
    /// All active, public, non-private sessions matching the filters, sorted
    /// by title then user count.
    pub async fn query_session_list(&self, opts: &QueryOptions) -> Result<Vec<SessionRow>> {
        let protocols = opts.protocols();

        let mut sql = String::from(
            "SELECT * FROM sessions \
             WHERE last_active >= ? AND unlisted = 0 AND private = 0",
        );
        if !opts.title.is_empty() {
            sql.push_str(" AND title LIKE '%' || ? || '%'");
        }
        if !opts.nsfm {
            sql.push_str(" AND nsfm = 0");
        }
        if !protocols.is_empty() {
            let placeholders = vec!["?"; protocols.len()].join(",");
            sql.push_str(&format!(" AND protocol IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY title ASC, users ASC");

        let mut query = sqlx::query_as::<_, SessionRow>(&sql).bind(self.active_cutoff());
        if !opts.title.is_empty() {
            query = query.bind(&opts.title);
        }
        for protocol in &protocols {
            query = query.bind(*protocol);
        }

        Ok(query.fetch_all(self.pool()).await?)
    }

    /// Is there an active announcement for this exact (host, id, port) tuple?
    pub async fn is_active_session(&self, host: &str, id: &str, port: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sessions \
             WHERE host = ? AND port = ? AND session_id = ? \
             AND last_active >= ? AND unlisted = 0)",
        )
        .bind(host)
        .bind(port)
        .bind(id)
        .bind(self.active_cutoff())
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }

    /// Number of active announcements for this host, over all ports.
    pub async fn host_session_count(&self, host: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions \
             WHERE host = ? AND last_active >= ? AND unlisted = 0",
        )
        .bind(host)
        .bind(self.active_cutoff())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// True if an unexpired ban row matches the host. Wildcard entries
    /// (`*.example.com`) match as suffixes, like the config lists.
    pub async fn is_banned_host(&self, host: &str) -> Result<bool> {
        let bans: Vec<String> = sqlx::query_scalar(
            "SELECT host FROM hostbans WHERE expires IS NULL OR expires > ?",
        )
        .bind(unix_now())
        .fetch_all(self.pool())
        .await?;
        Ok(is_host_in_list(host, &bans))
    }

    /// Insert a new announcement. Does no validation; that is the admission
    /// controller's job.
    pub async fn insert_session(
        &self,
        session: &crate::api::rest::types::SessionEntry,
        client_ip: &str,
    ) -> Result<NewSession> {
        let update_key = generate_update_key();
        let now = unix_now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO sessions \
             (host, port, session_id, protocol, title, users, usernames, password, nsfm, \
              owner, started, last_active, unlisted, unlist_reason, update_key, client_ip, \
              private, max_users, closed, active_drawing_users, allow_web) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, '', ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&session.host)
        .bind(session.port)
        .bind(&session.id)
        .bind(&session.protocol)
        .bind(&session.title)
        .bind(session.users)
        .bind(encode_usernames(&session.usernames))
        .bind(session.password)
        .bind(session.nsfm)
        .bind(&session.owner)
        .bind(now)
        .bind(now)
        .bind(&update_key)
        .bind(client_ip)
        .bind(session.private)
        .bind(session.max_users)
        .bind(session.closed)
        .bind(session.active_drawing_users)
        .bind(session.allow_web)
        .fetch_one(self.pool())
        .await?;

        Ok(NewSession {
            id,
            key: update_key,
        })
    }

    /// Refresh an announcement: bump `last_active` and apply the supplied
    /// field subset.
    ///
    /// The check and update are a single conditional UPDATE, so a concurrent
    /// delete or admin kick can never be overwritten. Only when nothing was
    /// updated is the row re-read to name the precise failure.
    pub async fn refresh_session(
        &self,
        fields: &RefreshFields,
        listing_id: i64,
        update_key: &str,
    ) -> Result<()> {
        let now = unix_now();

        let mut sql = String::from("UPDATE sessions SET last_active = ?");
        if fields.title.is_some() {
            sql.push_str(", title = ?");
        }
        if fields.users.is_some() {
            sql.push_str(", users = ?");
        }
        if fields.usernames.is_some() {
            sql.push_str(", usernames = ?");
        }
        if fields.password.is_some() {
            sql.push_str(", password = ?");
        }
        if fields.nsfm.is_some() {
            sql.push_str(", nsfm = ?");
        }
        if fields.private.is_some() {
            sql.push_str(", private = ?");
        }
        if fields.max_users.is_some() {
            sql.push_str(", max_users = ?");
        }
        if fields.closed.is_some() {
            sql.push_str(", closed = ?");
        }
        if fields.active_drawing_users.is_some() {
            sql.push_str(", active_drawing_users = ?");
        }
        if fields.allow_web.is_some() {
            sql.push_str(", allow_web = ?");
        }
        sql.push_str(
            " WHERE id = ? AND update_key = ? AND unlisted = 0 AND last_active >= ?",
        );

        let mut query = sqlx::query(&sql).bind(now);
        if let Some(title) = &fields.title {
            query = query.bind(title);
        }
        if let Some(users) = fields.users {
            query = query.bind(users);
        }
        if let Some(usernames) = &fields.usernames {
            query = query.bind(encode_usernames(usernames));
        }
        if let Some(password) = fields.password {
            query = query.bind(password);
        }
        if let Some(nsfm) = fields.nsfm {
            query = query.bind(nsfm);
        }
        if let Some(private) = fields.private {
            query = query.bind(private);
        }
        if let Some(max_users) = fields.max_users {
            query = query.bind(max_users);
        }
        if let Some(closed) = fields.closed {
            query = query.bind(closed);
        }
        if let Some(active) = fields.active_drawing_users {
            query = query.bind(active);
        }
        if let Some(allow_web) = fields.allow_web {
            query = query.bind(allow_web);
        }

        let result = query
            .bind(listing_id)
            .bind(update_key)
            .bind(self.active_cutoff())
            .execute(self.pool())
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let row: Option<(String, bool, String)> = sqlx::query_as(
            "SELECT update_key, unlisted, unlist_reason FROM sessions WHERE id = ?",
        )
        .bind(listing_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Err(ApiError::Refresh("no such session".to_string())),
            Some((key, _, _)) if key != update_key => {
                Err(ApiError::Refresh("invalid session key".to_string()))
            }
            Some((_, true, reason)) if reason.is_empty() => {
                Err(ApiError::Refresh("already unlisted".to_string()))
            }
            Some((_, true, reason)) => Err(ApiError::Refresh(reason)),
            Some(_) => Err(ApiError::Refresh("timed out".to_string())),
        }
    }

    /// Unlist an announcement. Returns whether a row changed; a second delete
    /// of the same listing returns false.
    pub async fn delete_session(&self, listing_id: i64, update_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET unlisted = 1 \
             WHERE id = ? AND update_key = ? AND unlisted = 0",
        )
        .bind(listing_id)
        .bind(update_key)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Purge unlisted rows and anything inactive for longer than a day. Run
    /// by the daily background sweep.
    pub async fn cleanup(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE unlisted != 0 OR last_active < ?")
            .bind(unix_now() - PURGE_AGE_SECS)
            .execute(self.pool())
            .await?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, "purged stale session rows");
        }
        Ok(purged)
    }
}
