use crate::auth::{AuthService, EMAIL_TAKEN, INVALID_CREDENTIALS};
use crate::cache::LocalCache;
use crate::config::Config;
use crate::db::{self, Database, Session, User, now_timestamp};
use crate::error::AppError;
use crate::genre;
use crate::listing::NewListing;
use crate::profile::{Profile, ProfileService};
use crate::server::{AppState, handlers, pages};
use crate::storage::{self, ObjectStorage};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, email: &str) {
    let user = User {
        id: id.to_string(),
        email: email.to_string(),
        password_hash: "hash".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn test_state(dir: &TempDir) -> AppState {
    let mut config = Config::default();
    config.storage.root = dir.path().join("objects");
    let db = test_db();
    let auth = AuthService::new(db.clone(), 30, 60, true);
    AppState::with_cache(config, db, auth, LocalCache::in_memory())
}

fn listing(title: &str) -> NewListing {
    NewListing {
        title: title.to_string(),
        author: "Frank Herbert".to_string(),
        genres: vec!["Science Fiction".to_string()],
        image: PNG.to_vec(),
    }
}

/// Wait for the session listener to drop every swipe session.
async fn wait_for_no_swipe_sessions(state: &AppState) {
    for _ in 0..100 {
        if state.swipes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(state.swipes.is_empty());
}

/// Make every write to `userBooks` documents fail.
fn freeze_book_lists(db: &Database) {
    db.execute_batch(
        "CREATE TRIGGER freeze_insert BEFORE INSERT ON documents
            WHEN NEW.collection = 'userBooks'
            BEGIN SELECT RAISE(ABORT, 'book lists are read-only'); END;
         CREATE TRIGGER freeze_update BEFORE UPDATE ON documents
            WHEN NEW.collection = 'userBooks'
            BEGIN SELECT RAISE(ABORT, 'book lists are read-only'); END;",
    )
    .unwrap();
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

// ========== DATABASE ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let found = db.get_user_by_email("ALICE@example.com").unwrap().unwrap();
    assert_eq!(found.id, "user-1");

    let found_by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(found_by_id.email, "alice@example.com");
}

#[test]
fn db_duplicate_email_is_field_error() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let user = User {
        id: "user-2".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: "hash2".to_string(),
        created_at: now_timestamp(),
        last_login: None,
    };
    match db.create_user(&user) {
        Err(AppError::Field { field, message }) => {
            assert_eq!(field, "email");
            assert_eq!(message, EMAIL_TAKEN);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn db_delete_user() {
    let db = test_db();
    create_user(&db, "user-1", "bob@example.com");

    assert!(db.delete_user("user-1").unwrap());
    assert!(db.get_user_by_email("bob@example.com").unwrap().is_none());
    assert!(!db.delete_user("user-1").unwrap());
}

#[test]
fn db_sessions_per_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    for token in ["t1", "t2"] {
        db.create_session(&Session {
            token: token.to_string(),
            user_id: "user-1".to_string(),
            expires_at: now_timestamp() + 3600,
        })
        .unwrap();
    }

    assert_eq!(db.get_session("t1").unwrap().unwrap().user_id, "user-1");

    let mut closed = db.delete_user_sessions("user-1").unwrap();
    closed.sort();
    assert_eq!(closed, vec!["t1".to_string(), "t2".to_string()]);
    assert!(db.get_session("t2").unwrap().is_none());
}

#[test]
fn db_expired_sessions_cleanup() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    db.create_session(&Session {
        token: "old".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 10,
    })
    .unwrap();
    db.create_session(&Session {
        token: "fresh".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() + 3600,
    })
    .unwrap();

    let purged = db.cleanup_expired_sessions().unwrap();
    assert_eq!(purged.len(), 1);
    assert_eq!(purged[0].token, "old");
    assert!(db.get_session("old").unwrap().is_none());
    assert!(db.get_session("fresh").unwrap().is_some());
}

#[test]
fn db_set_document_merge_and_overwrite() {
    let db = test_db();
    db.set_document("c", "d", json!({"a": 1, "nested": {"x": 1}}), false)
        .unwrap();

    db.set_document("c", "d", json!({"b": 2, "nested": {"y": 2}}), true)
        .unwrap();
    let doc = db.get_document("c", "d").unwrap().unwrap();
    assert_eq!(doc.data, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 2}}));

    db.set_document("c", "d", json!({"b": 3}), false).unwrap();
    let doc = db.get_document("c", "d").unwrap().unwrap();
    assert_eq!(doc.data, json!({"b": 3}));
}

#[test]
fn db_update_document_requires_existing() {
    let db = test_db();
    assert!(matches!(
        db.update_document("c", "missing", json!({"a": 1})),
        Err(AppError::NotFound(_))
    ));

    db.set_document("c", "d", json!({"a": 1, "list": [1, 2]}), false)
        .unwrap();
    db.update_document("c", "d", json!({"list": [2]})).unwrap();
    let doc = db.get_document("c", "d").unwrap().unwrap();
    assert_eq!(doc.data, json!({"a": 1, "list": [2]}));
}

#[test]
fn db_list_and_delete_documents() {
    let db = test_db();
    db.set_document("c", "b", json!({"name": "b"}), false).unwrap();
    db.set_document("c", "a", json!({"name": "a"}), false).unwrap();
    db.set_document("other", "z", json!({}), false).unwrap();

    let ids: Vec<String> = db
        .list_documents("c")
        .unwrap()
        .into_iter()
        .map(|d| d.data["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(db.delete_document("c", "a").unwrap());
    assert!(!db.delete_document("c", "a").unwrap());
    assert!(db.get_document("c", "a").unwrap().is_none());
}

// ========== AUTH ==========

#[test]
fn auth_sign_up_and_sign_in() {
    let auth = AuthService::new(test_db(), 30, 60, true);

    let user = auth.sign_up("reader@example.com", "password123").unwrap();
    let (signed_in, token) = auth.sign_in("reader@example.com", "password123").unwrap();
    assert_eq!(signed_in.id, user.id);

    let current = auth.validate_token(&token).unwrap().unwrap();
    assert_eq!(current.email, "reader@example.com");
    assert!(auth.validate_token("invalid_token").unwrap().is_none());
}

#[test]
fn auth_duplicate_email() {
    let auth = AuthService::new(test_db(), 30, 60, true);
    auth.sign_up("reader@example.com", "password123").unwrap();

    match auth.sign_up("Reader@example.com", "other-password") {
        Err(AppError::Field { field, message }) => {
            assert_eq!(field, "email");
            assert_eq!(message, "Username already exists");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(auth.list_users().unwrap().len(), 1);
}

#[test]
fn auth_invalid_credentials() {
    let auth = AuthService::new(test_db(), 30, 60, true);
    auth.sign_up("reader@example.com", "correct-horse").unwrap();

    for (email, password) in [
        ("reader@example.com", "wrong"),
        ("nobody@example.com", "correct-horse"),
    ] {
        match auth.sign_in(email, password) {
            Err(AppError::Field { message, .. }) => assert_eq!(message, INVALID_CREDENTIALS),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

#[test]
fn auth_registration_disabled() {
    let auth = AuthService::new(test_db(), 30, 60, false);
    assert!(auth.sign_up("new@example.com", "password").is_err());
    // Admin creation still works
    assert!(auth.create_user("new@example.com", "password").is_ok());
}

#[test]
fn auth_rejects_bad_input() {
    let auth = AuthService::new(test_db(), 30, 60, true);

    assert!(auth.create_user("user@example.com", "abc").is_err());
    assert!(auth.create_user("not-an-email", "password").is_err());
    assert!(auth.create_user("a b@example.com", "password").is_err());
    assert!(auth.create_user("", "password").is_err());
}

#[test]
fn auth_sign_out() {
    let auth = AuthService::new(test_db(), 30, 60, true);
    auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = auth.sign_in("reader@example.com", "password").unwrap();

    auth.sign_out(&token).unwrap();
    assert!(auth.current_user(&token).is_none());
}

#[test]
fn auth_change_password() {
    let auth = AuthService::new(test_db(), 30, 60, true);
    auth.sign_up("reader@example.com", "oldpass").unwrap();

    assert!(auth.change_password("reader@example.com", "newpass").unwrap());
    assert!(auth.sign_in("reader@example.com", "oldpass").is_err());
    assert!(auth.sign_in("reader@example.com", "newpass").is_ok());
    assert!(!auth.change_password("nobody@example.com", "newpass").unwrap());
}

#[test]
fn auth_password_reset_flow() {
    let auth = AuthService::new(test_db(), 30, 60, true);
    auth.sign_up("reader@example.com", "oldpass").unwrap();
    let (_, session) = auth.sign_in("reader@example.com", "oldpass").unwrap();

    assert!(
        auth.request_password_reset("nobody@example.com")
            .unwrap()
            .is_none()
    );
    let token = auth
        .request_password_reset("reader@example.com")
        .unwrap()
        .unwrap();

    auth.confirm_password_reset(&token, "newpass").unwrap();

    // Old sessions are closed and the token is single use
    assert!(auth.current_user(&session).is_none());
    assert!(auth.confirm_password_reset(&token, "another").is_err());
    assert!(auth.sign_in("reader@example.com", "oldpass").is_err());
    assert!(auth.sign_in("reader@example.com", "newpass").is_ok());
}

// ========== GENRES ==========

#[test]
fn genres_add_list_remove() {
    let db = test_db();
    genre::add_genre(&db, "Science Fiction").unwrap();
    genre::add_genre(&db, "Fantasy").unwrap();
    genre::add_genre(&db, " Fantasy ").unwrap();

    assert_eq!(
        genre::list_genres(&db).unwrap(),
        vec!["Fantasy".to_string(), "Science Fiction".to_string()]
    );
    assert!(genre::add_genre(&db, "  ").is_err());

    assert!(genre::remove_genre(&db, "science fiction").unwrap());
    assert_eq!(genre::list_genres(&db).unwrap(), vec!["Fantasy".to_string()]);
}

// ========== PROFILES ==========

#[tokio::test]
async fn profile_save_then_load_returns_saved() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let saved = Profile {
        name: "Alice".to_string(),
        description: "Reads on the train".to_string(),
        interests: vec!["Fantasy".to_string(), "Poetry".to_string()],
        picture_url: None,
    };
    state.profiles.save("user-1", &saved).unwrap();

    let loaded = state.profiles.load("user-1").await;
    assert_eq!(loaded, saved);
    assert_eq!(state.profiles.cached("user-1"), Some(saved));
    assert!(state.profiles.is_recently_updated("user-1"));
}

#[tokio::test]
async fn profile_load_falls_back_to_cache() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let saved = Profile {
        name: "Alice".to_string(),
        interests: vec!["Poetry".to_string()],
        ..Profile::default()
    };
    state.profiles.save("user-1", &saved).unwrap();
    assert_eq!(state.profiles.load("user-1").await, saved);

    // A document that no longer parses makes the store read fail.
    state
        .db
        .set_document(db::PROFILES, "user-1", json!({"name": 5}), false)
        .unwrap();
    assert_eq!(state.profiles.load("user-1").await, saved);
}

#[tokio::test]
async fn profile_missing_is_empty() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    assert_eq!(state.profiles.load("nobody").await, Profile::default());
    assert!(!state.profiles.is_recently_updated("nobody"));
}

#[tokio::test]
async fn profile_picture_resolves_to_first_object() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    state
        .profiles
        .create(
            "user-1",
            &Profile {
                name: "Alice".to_string(),
                ..Profile::default()
            },
        )
        .unwrap();
    let path = state
        .profiles
        .upload_picture("user-1", "me.png", PNG)
        .await
        .unwrap();
    assert_eq!(path, "profilePictures/user-1/me.png");

    let loaded = state.profiles.load("user-1").await;
    assert_eq!(loaded.picture_url, Some(state.storage.url_for(&path)));
    // Creating a profile is not an update
    assert!(!state.profiles.is_recently_updated("user-1"));
}

#[tokio::test]
async fn profile_updated_flag_expires() {
    let dir = TempDir::new().unwrap();
    let storage = ObjectStorage::new(dir.path(), "");
    let profiles = ProfileService::new(
        test_db(),
        storage,
        LocalCache::in_memory(),
        Duration::from_millis(50),
    );

    profiles.save("user-1", &Profile::default()).unwrap();
    assert!(profiles.is_recently_updated("user-1"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!profiles.is_recently_updated("user-1"));
}

// ========== LISTINGS ==========

#[tokio::test]
async fn listing_upload_then_delete_dune() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.listings.upload("user-1", listing("Foundation")).await.unwrap();
    let before = state.listings.list("user-1").unwrap().len();

    let dune = state.listings.upload("user-1", listing("Dune")).await.unwrap();
    assert_eq!(state.listings.list("user-1").unwrap().len(), before + 1);
    assert_eq!(dune.genres, vec!["Science Fiction".to_string()]);

    let path = storage::path_from_download_url(&dune.picture).unwrap();
    assert!(path.starts_with("bookPictures/user-1/Dune_"));
    assert!(state.storage.exists(&path).await.unwrap());
    assert_eq!(dune.token, storage::download_token(&path));

    let outcome = state.listings.delete("user-1", "Dune").await;
    assert!(outcome.found && outcome.list_updated && outcome.image_deleted);

    let after = state.listings.list("user-1").unwrap();
    assert_eq!(after.len(), before);
    assert!(after.iter().all(|b| b.title != "Dune"));
    assert!(!state.storage.exists(&path).await.unwrap());
}

#[tokio::test]
async fn listing_delete_removes_exactly_one() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    for title in ["Emma", "Ulysses", "Beloved"] {
        state.listings.upload("user-1", listing(title)).await.unwrap();
    }
    let before = state.listings.list("user-1").unwrap();

    state.listings.delete("user-1", "Ulysses").await;

    let after = state.listings.list("user-1").unwrap();
    let expected: Vec<_> = before.into_iter().filter(|b| b.title != "Ulysses").collect();
    assert_eq!(after, expected);

    let missing = state.listings.delete("user-1", "Ulysses").await;
    assert!(!missing.found);
}

#[tokio::test]
async fn listing_concurrent_uploads_keep_both() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let (dune, emma) = tokio::join!(
        state.listings.upload("user-1", listing("Dune")),
        state.listings.upload("user-1", listing("Emma")),
    );
    assert_ok!(dune);
    assert_ok!(emma);

    let mut titles: Vec<String> = state
        .listings
        .list("user-1")
        .unwrap()
        .into_iter()
        .map(|b| b.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Dune", "Emma"]);
    assert_eq!(state.listings.reconcile("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn listing_concurrent_duplicate_title_conflicts() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let (first, second) = tokio::join!(
        state.listings.upload("user-1", listing("Dune")),
        state.listings.upload("user-1", listing("Dune")),
    );
    let conflicts = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(AppError::Conflict(_))))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(state.listings.list("user-1").unwrap().len(), 1);
    assert_eq!(state.listings.reconcile("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn listing_upload_removes_picture_when_list_write_fails() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    freeze_book_lists(&state.db);

    assert_err!(state.listings.upload("user-1", listing("Dune")).await);

    assert!(state.listings.list("user-1").unwrap().is_empty());
    let folder = state.storage.list_all("bookPictures/user-1").await.unwrap();
    assert!(folder.items.is_empty());
}

#[tokio::test]
async fn listing_delete_keeps_list_update_when_picture_is_gone() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let dune = state.listings.upload("user-1", listing("Dune")).await.unwrap();
    let path = storage::path_from_download_url(&dune.picture).unwrap();
    state.storage.delete(&path).await.unwrap();

    let outcome = state.listings.delete("user-1", "Dune").await;
    assert!(outcome.found);
    assert!(outcome.list_updated);
    assert!(!outcome.image_deleted);
    assert!(state.listings.list("user-1").unwrap().is_empty());
}

#[tokio::test]
async fn listing_delete_removes_picture_when_list_write_fails() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let dune = state.listings.upload("user-1", listing("Dune")).await.unwrap();
    let path = storage::path_from_download_url(&dune.picture).unwrap();
    freeze_book_lists(&state.db);

    let outcome = state.listings.delete("user-1", "Dune").await;
    assert!(outcome.found);
    assert!(!outcome.list_updated);
    assert!(outcome.image_deleted);
    assert_eq!(state.listings.list("user-1").unwrap(), vec![dune]);
    assert!(!state.storage.exists(&path).await.unwrap());
}

#[tokio::test]
async fn listing_rejects_bad_uploads() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.listings.upload("user-1", listing("Dune")).await.unwrap();

    assert!(matches!(
        state.listings.upload("user-1", listing("Dune")).await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        state.listings.upload("user-1", listing("  ")).await,
        Err(AppError::Field { field: "title", .. })
    ));

    let mut not_an_image = listing("Emma");
    not_an_image.image = b"plain text".to_vec();
    assert!(matches!(
        state.listings.upload("user-1", not_an_image).await,
        Err(AppError::Field {
            field: "picture",
            ..
        })
    ));

    assert_eq!(state.listings.list("user-1").unwrap().len(), 1);
    let folder = state.storage.list_all("bookPictures/user-1").await.unwrap();
    assert_eq!(folder.items.len(), 1);
}

#[tokio::test]
async fn listing_reconcile_removes_orphans() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let kept = state.listings.upload("user-1", listing("Dune")).await.unwrap();
    state
        .storage
        .upload("bookPictures/user-1/stray_1", PNG)
        .await
        .unwrap();

    assert_eq!(state.listings.reconcile("user-1").await.unwrap(), 1);
    assert_eq!(state.listings.reconcile("user-1").await.unwrap(), 0);

    let kept_path = storage::path_from_download_url(&kept.picture).unwrap();
    assert!(state.storage.exists(&kept_path).await.unwrap());
    assert!(!state.storage.exists("bookPictures/user-1/stray_1").await.unwrap());
}

// ========== FEED ==========

#[tokio::test]
async fn feed_excludes_viewer_and_uses_titles() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.listings.upload("alice", listing("Dune")).await.unwrap();
    state.listings.upload("bob", listing("Emma")).await.unwrap();
    state.listings.upload("carol", listing("Beloved")).await.unwrap();
    state
        .storage
        .upload("bookPictures/carol/unlisted_1", PNG)
        .await
        .unwrap();

    let feed = state.catalog.feed("alice").await.unwrap();

    let ids: Vec<u64> = feed.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(feed.iter().all(|b| b.owner_id != "alice"));

    let titles: Vec<&str> = feed.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Emma", "Beloved", "Book 3"]);
}

#[tokio::test]
async fn feed_is_empty_without_pictures() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    assert!(state.catalog.feed("alice").await.unwrap().is_empty());
}

// ========== HTTP ==========

#[tokio::test]
async fn signup_with_taken_email_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let request = |name: &str| {
        Json(
            serde_json::from_value(json!({
                "email": "reader@example.com",
                "password": "password123",
                "name": name,
                "interests": ["Poetry"],
            }))
            .unwrap(),
        )
    };

    let first = handlers::auth_signup(State(state.clone()), request("First"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().contains_key(header::SET_COOKIE));

    let Err(err) = handlers::auth_signup(State(state.clone()), request("Second")).await else {
        panic!("duplicate signup succeeded");
    };
    assert!(matches!(
        &err,
        AppError::Field { field: "email", message } if message == EMAIL_TAKEN
    ));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

    assert_eq!(state.auth.list_users().unwrap().len(), 1);
    let profiles = state.db.list_documents(db::PROFILES).unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].data["name"], "First");
}

#[tokio::test]
async fn protected_pages_redirect_when_signed_out() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let mut stale = HeaderMap::new();
    stale.insert(
        header::COOKIE,
        HeaderValue::from_static("bookswap_session=expired"),
    );

    for headers in [HeaderMap::new(), stale] {
        let responses = vec![
            pages::home(State(state.clone()), headers.clone())
                .await
                .unwrap(),
            pages::profile(State(state.clone()), headers.clone())
                .await
                .unwrap(),
            pages::messages(State(state.clone()), headers.clone()).await,
            pages::history(State(state.clone()), headers.clone()).await,
        ];

        for response in responses {
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], "/");
        }
    }
}

#[tokio::test]
async fn protected_pages_render_when_signed_in() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();

    let response = pages::home(State(state.clone()), bearer(&token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = pages::messages(State(state.clone()), bearer(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn home_shows_no_books_when_feed_read_fails() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();

    // A file where the picture folder should be makes the listing fail.
    std::fs::create_dir_all(dir.path().join("objects")).unwrap();
    std::fs::write(dir.path().join("objects/bookPictures"), b"not a folder").unwrap();

    let response = pages::home(State(state.clone()), bearer(&token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("No new books"));
    assert!(state.swipes.cursor(&token).is_none());
}

#[tokio::test]
async fn api_requires_session() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);

    let Err(err) = handlers::books_list(State(state), HeaderMap::new()).await else {
        panic!("unauthenticated request succeeded");
    };
    assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn api_feed_like_and_history() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    state.listings.upload("owner", listing("Dune")).await.unwrap();
    state.listings.upload("owner", listing("Emma")).await.unwrap();

    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();

    handlers::feed_get(State(state.clone()), bearer(&token))
        .await
        .unwrap();
    handlers::feed_like(State(state.clone()), bearer(&token))
        .await
        .unwrap();
    // Last book: ends the feed without recording a verdict
    handlers::feed_dislike(State(state.clone()), bearer(&token))
        .await
        .unwrap();

    let Json(history) = handlers::history_get(State(state.clone()), bearer(&token))
        .await
        .unwrap();
    assert_eq!(history.liked.len(), 1);
    assert_eq!(history.liked[0].title, "Dune");
    assert!(history.disliked.is_empty());

    let cursor = state.swipes.cursor(&token).unwrap();
    assert!(cursor.no_more_books);
    assert_eq!(cursor.index, 1);
}

#[tokio::test]
async fn sign_out_drops_swipe_state() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let listener = state.spawn_session_listener();

    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();
    state.swipes.load_feed(&token, Vec::new());
    assert_eq!(state.swipes.len(), 1);

    state.auth.sign_out(&token).unwrap();
    wait_for_no_swipe_sessions(&state).await;
    listener.abort();
}

#[tokio::test]
async fn expired_session_purge_drops_swipe_state() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let listener = state.spawn_session_listener();

    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, stale) = state.auth.sign_in("reader@example.com", "password").unwrap();
    let (_, live) = state.auth.sign_in("reader@example.com", "password").unwrap();
    state.swipes.load_feed(&stale, Vec::new());

    state
        .db
        .execute_batch(&format!(
            "UPDATE sessions SET expires_at = 0 WHERE token = '{}'",
            stale
        ))
        .unwrap();

    assert_eq!(assert_ok!(state.auth.purge_expired_sessions()), 1);
    wait_for_no_swipe_sessions(&state).await;
    assert!(state.auth.current_user(&live).is_some());
    listener.abort();
}

#[tokio::test]
async fn deleting_user_drops_swipe_state() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let listener = state.spawn_session_listener();

    state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();
    state.swipes.load_feed(&token, Vec::new());

    assert!(assert_ok!(state.auth.delete_user("reader@example.com")));
    wait_for_no_swipe_sessions(&state).await;
    assert!(state.auth.current_user(&token).is_none());
    listener.abort();
}

#[tokio::test]
async fn profile_put_ignores_client_picture_url() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let user = state.auth.sign_up("reader@example.com", "password").unwrap();
    let (_, token) = state.auth.sign_in("reader@example.com", "password").unwrap();

    assert_ok!(
        handlers::profile_put(
            State(state.clone()),
            bearer(&token),
            Json(Profile {
                name: "Reader".to_string(),
                picture_url: Some("https://elsewhere.example/me.png".to_string()),
                ..Profile::default()
            }),
        )
        .await
    );
    assert_eq!(state.profiles.load(&user.id).await.picture_url, None);

    let stored = state.db.get_document(db::PROFILES, &user.id).unwrap().unwrap();
    assert_eq!(stored.data, json!({"name": "Reader", "description": "", "interests": []}));
}

#[tokio::test]
async fn storage_object_checks_token() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let path = "bookPictures/owner/Dune_1".to_string();
    state.storage.upload(&path, PNG).await.unwrap();

    let query = |token: &str| Query(serde_json::from_value(json!({ "token": token })).unwrap());

    let response = handlers::storage_object(
        State(state.clone()),
        Path(path.clone()),
        query(&storage::download_token(&path)),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let denied =
        handlers::storage_object(State(state.clone()), Path(path.clone()), query("wrong")).await;
    assert!(matches!(denied, Err(AppError::NotFound(_))));
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
title = "Swap Shop"
public_url = "https://books.example.org"

[database]
path = "/tmp/test.db"

[auth]
registration = "disabled"
session_days = 7

[profile]
updated_flag_seconds = 5

[catalog]
max_concurrency = 2
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.title, "Swap Shop");
    assert_eq!(config.server.public_url, "https://books.example.org");
    assert!(!config.auth.registration_enabled());
    assert_eq!(config.auth.session_days, 7);
    assert_eq!(config.auth.reset_token_minutes, 60);
    assert_eq!(config.profile.updated_flag_seconds, 5);
    assert_eq!(config.catalog.max_concurrency, 2);
    assert_eq!(config.catalog.root, "bookPictures");
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.auth.registration_enabled());
    assert_eq!(config.profile.updated_flag_seconds, 3);
    assert_eq!(config.catalog.max_concurrency, 8);
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.title, "BookSwap");
    assert_eq!(config.catalog.root, "bookPictures");
}
