//! Integration tests for the public REST API.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{CLIENT_IP, TestRequest, announce, announcement, build_app, test_config};

#[sqlx::test]
async fn root_reports_server_info(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let (status, body) = TestRequest::new("GET", "/").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_name"], "inklist-session-directory");
    assert_eq!(body["name"], "test directory");
    assert_eq!(body["read_only"], false);
    assert_eq!(body["public"], true);
    assert_eq!(body["private"], true);
}

#[sqlx::test]
async fn announce_returns_listing_and_key(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.welcome = "welcome!".to_string();
    let (app, _) = build_app(pool, cfg);

    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(announcement("alpha", "A"))
        .send(&app)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 1);
    assert_eq!(body["expires"], 10);
    assert_eq!(body["message"], "welcome!");
    assert!(!body["key"].as_str().unwrap().is_empty());

    let (status, list) = TestRequest::new("GET", "/sessions/").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], "alpha");
    assert_eq!(list[0]["host"], CLIENT_IP);
    assert_eq!(list[0]["usernames"], json!(["User1", "Other, one"]));
    assert!(list[0]["started"].as_str().unwrap().ends_with('Z'));
}

#[sqlx::test]
async fn duplicate_announcement_is_rejected(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    announce(&app, "alpha", "A").await;
    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(announcement("alpha", "A"))
        .send(&app)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Session already listed");
}

#[sqlx::test]
async fn per_host_cap_is_enforced(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    for id in ["one", "two", "three"] {
        announce(&app, id, "t").await;
    }

    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(announcement("four", "t"))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Max listing count exceeded for this host");
}

#[sqlx::test]
async fn trusted_hosts_bypass_the_cap(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.trusted_hosts = vec![CLIENT_IP.to_string()];
    let (app, _) = build_app(pool, cfg);

    for id in ["one", "two", "three", "four", "five"] {
        announce(&app, id, "t").await;
    }
}

#[sqlx::test]
async fn banned_host_is_refused(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.banned_hosts = vec![CLIENT_IP.to_string()];
    let (app, _) = build_app(pool, cfg);

    let (status, _) = TestRequest::new("POST", "/sessions/")
        .json(announcement("alpha", "A"))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test]
async fn validation_errors_name_the_field(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(json!({"host": CLIENT_IP, "id": "bad id!", "protocol": "dp:4.21.2"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "id: invalid ID");

    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(json!({"host": CLIENT_IP, "id": "ok", "protocol": "nonsense"}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "protocol: unsupported protocol version");
}

#[sqlx::test]
async fn nsfm_keyword_tags_the_listing(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.nsfm_words = vec!["spicy".to_string()];
    cfg.normalize().unwrap();
    let (app, _) = build_app(pool, cfg);

    announce(&app, "alpha", "a very Spicy canvas").await;

    // Hidden from the default list, visible with nsfm=true.
    let (_, list) = TestRequest::new("GET", "/sessions/").send(&app).await;
    assert_eq!(list.as_array().unwrap().len(), 0);

    let (_, list) = TestRequest::new("GET", "/sessions/?nsfm=true").send(&app).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["nsfm"], true);
}

#[sqlx::test]
async fn private_announcements_never_reach_the_public_list(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let mut body = announcement("hidden", "secret");
    body["private"] = json!(true);
    let (status, _) = TestRequest::new("POST", "/sessions/").json(body).send(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = TestRequest::new("GET", "/sessions/").send(&app).await;
    assert_eq!(list.as_array().unwrap().len(), 0);

    // The tuple is still occupied: relisting is a duplicate.
    let mut body = announcement("hidden", "secret");
    body["private"] = json!(true);
    let (status, body) = TestRequest::new("POST", "/sessions/").json(body).send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Session already listed");
}

#[sqlx::test]
async fn private_announcements_require_the_feature(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.roomcodes = false;
    let (app, _) = build_app(pool, cfg);

    let mut body = announcement("hidden", "secret");
    body["private"] = json!(true);
    let (status, _) = TestRequest::new("POST", "/sessions/").json(body).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn refresh_updates_fields_and_list_reflects_them(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    let (id, key) = announce(&app, "alpha", "A").await;

    let (status, body) = TestRequest::new("PUT", &format!("/sessions/{id}/"))
        .update_key(&key)
        .json(json!({"title": "B", "users": 5, "usernames": ["x", "y"]}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "ok");

    let (_, list) = TestRequest::new("GET", "/sessions/").send(&app).await;
    assert_eq!(list[0]["title"], "B");
    assert_eq!(list[0]["users"], 5);
    assert_eq!(list[0]["usernames"], json!(["x", "y"]));
}

#[sqlx::test]
async fn refresh_with_wrong_key_fails(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    let (id, _) = announce(&app, "alpha", "A").await;

    let (status, body) = TestRequest::new("PUT", &format!("/sessions/{id}/"))
        .update_key("not-the-key")
        .json(json!({"users": 5}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid session key");
}

#[sqlx::test]
async fn timed_out_listing_cannot_be_refreshed(pool: SqlitePool) {
    let (app, state) = build_app(pool.clone(), test_config());
    let (id, key) = announce(&app, "alpha", "A").await;

    // Eleven minutes of silence against a ten minute timeout.
    let stale = chrono::Utc::now().timestamp() - 11 * 60;
    sqlx::query("UPDATE sessions SET last_active = ? WHERE id = ?")
        .bind(stale)
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let (status, body) = TestRequest::new("PUT", &format!("/sessions/{id}/"))
        .update_key(&key)
        .json(json!({"users": 5}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "timed out");

    // And it no longer counts as active.
    let store = state.store.as_ref().unwrap();
    assert!(!store.is_active_session(CLIENT_IP, "alpha", 27750).await.unwrap());
}

#[sqlx::test]
async fn batch_refresh_reports_per_id_results(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    let (id1, key1) = announce(&app, "alpha", "A").await;
    let (id2, _) = announce(&app, "beta", "B").await;

    let (status, body) = TestRequest::new("PUT", "/sessions/")
        .json(json!({
            id1.to_string(): {"updatekey": key1, "title": "A2"},
            id2.to_string(): {"updatekey": "wrong", "title": "B2"},
        }))
        .send(&app)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["responses"][id1.to_string()], "ok");
    assert_eq!(body["responses"][id2.to_string()], "error");
    assert_eq!(body["errors"][id2.to_string()], "invalid session key");
}

#[sqlx::test]
async fn malformed_batch_documents_fail_whole_request(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let (status, body) = TestRequest::new("PUT", "/sessions/")
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "At least one session should be included");

    let (status, body) = TestRequest::new("PUT", "/sessions/")
        .json(json!({"xyz": {"updatekey": "k"}}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "xyz is not an integer");

    let (status, body) = TestRequest::new("PUT", "/sessions/")
        .json(json!({"1": {"title": "no key"}}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "1.updatekey: expected string");
}

#[sqlx::test]
async fn delete_succeeds_exactly_once(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    let (id, key) = announce(&app, "alpha", "A").await;

    let (status, body) = TestRequest::new("DELETE", &format!("/sessions/{id}/"))
        .update_key(&key)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = TestRequest::new("DELETE", &format!("/sessions/{id}/"))
        .update_key(&key)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Refresh after an owner delete names the state.
    let (status, body) = TestRequest::new("PUT", &format!("/sessions/{id}/"))
        .update_key(&key)
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "already unlisted");
}

#[sqlx::test]
async fn rate_limit_trips_on_the_twenty_first_request(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    // Twenty non-GET requests pass the gate, whatever their outcome.
    for i in 0..20 {
        let (status, _) = TestRequest::new("PUT", "/sessions/")
            .client_ip("198.51.100.9")
            .json(json!({}))
            .send(&app)
            .await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS, "request {i}");
    }

    let (status, body) = TestRequest::new("PUT", "/sessions/")
        .client_ip("198.51.100.9")
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("Wait"), "{message}");

    // Other clients are unaffected, and GETs never count.
    let (status, _) = TestRequest::new("GET", "/sessions/")
        .client_ip("198.51.100.9")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = TestRequest::new("PUT", "/sessions/")
        .client_ip("198.51.100.10")
        .json(json!({}))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn user_agent_gate_applies_to_mutations_only(pool: SqlitePool) {
    let mut cfg = test_config();
    cfg.check_user_agent = true;
    let (app, _) = build_app(pool, cfg);

    // No User-Agent header at all: GET passes, POST does not.
    let (status, _) = TestRequest::new("GET", "/sessions/").send(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = TestRequest::new("POST", "/sessions/")
        .json(announcement("alpha", "A"))
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test]
async fn sloppy_paths_are_canonicalized(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let (status, _) = TestRequest::new("GET", "//sessions").send(&app).await;
    assert_eq!(status, StatusCode::OK);
}

#[sqlx::test]
async fn join_codes_are_gone(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    let (status, _) = TestRequest::new("GET", "/join/ABCDE/").send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn list_is_sorted_by_title_then_users(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());

    announce(&app, "a1", "Beta").await;
    announce(&app, "a2", "Alpha").await;

    let mut third = announcement("a3", "Alpha");
    third["users"] = json!(0);
    let (status, _) = TestRequest::new("POST", "/sessions/").json(third).send(&app).await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = TestRequest::new("GET", "/sessions/").send(&app).await;
    let titles: Vec<(&str, i64)> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["title"].as_str().unwrap(), s["users"].as_i64().unwrap()))
        .collect();
    assert_eq!(titles, vec![("Alpha", 0), ("Alpha", 2), ("Beta", 2)]);
}

#[sqlx::test]
async fn title_filter_is_a_case_insensitive_substring(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    announce(&app, "a1", "Example").await;
    announce(&app, "a2", "Test").await;

    let (_, list) = TestRequest::new("GET", "/sessions/?title=ex").send(&app).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["title"], "Example");
}

#[sqlx::test]
async fn protocol_filter_is_a_comma_separated_whitelist(pool: SqlitePool) {
    let (app, _) = build_app(pool, test_config());
    announce(&app, "a1", "A").await;

    let (_, list) = TestRequest::new("GET", "/sessions/?protocol=dp:4.21.2,dp:4.20.1")
        .send(&app)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, list) = TestRequest::new("GET", "/sessions/?protocol=dp:4.19.0")
        .send(&app)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}
