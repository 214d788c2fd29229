//! JSON API and object download handlers.

use crate::catalog::FeedBook;
use crate::db;
use crate::error::{AppError, Result};
use crate::genre;
use crate::listing::{DeleteOutcome, NewListing, UserBook};
use crate::profile::Profile;
use crate::server::AppState;
use crate::storage;
use crate::swipe::{FeedCursor, SwipeState};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Name of the session cookie set by the web pages.
pub const SESSION_COOKIE: &str = "bookswap_session";

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user_id: String,
    email: String,
}

/// Signup request. The profile is created together with the account.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    interests: Vec<String>,
    picture_name: Option<String>,
    picture_base64: Option<String>,
}

/// Password reset request.
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    email: String,
}

/// Password reset confirmation.
#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    token: String,
    password: String,
}

/// Everything collected by a signup form.
pub(super) struct NewAccount {
    pub email: String,
    pub password: String,
    pub profile: Profile,
    pub picture: Option<(String, Vec<u8>)>,
}

/// Create the account and its profile document, then sign in.
///
/// A duplicate email fails before anything is written. A failed picture
/// upload is logged and does not undo the account.
pub(super) async fn register_account(
    state: &AppState,
    account: NewAccount,
) -> Result<(db::User, String)> {
    if account.profile.name.trim().is_empty() {
        return Err(AppError::Field {
            field: "name",
            message: "Name is required".to_string(),
        });
    }

    let user = state.auth.sign_up(&account.email, &account.password)?;
    state.profiles.create(&user.id, &account.profile)?;

    if let Some((file_name, data)) = account.picture {
        if let Err(e) = state.profiles.upload_picture(&user.id, &file_name, &data).await {
            tracing::error!(user_id = %user.id, error = %e, "Error uploading profile picture");
        }
    }

    state.auth.sign_in(&account.email, &account.password)
}

fn login_response(state: &AppState, user: db::User, token: String) -> Response {
    let cookie = session_cookie(&token, state.config.auth.session_days);
    let mut response = Json(LoginResponse {
        token,
        user_id: user.id,
        email: user.email,
    })
    .into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    response
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response> {
    let (user, token) = state.auth.sign_in(&req.email, &req.password)?;
    Ok(login_response(&state, user, token))
}

/// Auth signup: account, profile document and optional profile picture.
pub async fn auth_signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Response> {
    let picture = match req.picture_base64 {
        Some(encoded) => {
            let data = STANDARD.decode(encoded.trim()).map_err(|_| AppError::Field {
                field: "picture",
                message: "Picture is not valid base64".to_string(),
            })?;
            let name = req.picture_name.unwrap_or_else(|| "profile".to_string());
            Some((name, data))
        }
        None => None,
    };

    let account = NewAccount {
        email: req.email,
        password: req.password,
        profile: Profile {
            name: req.name.trim().to_string(),
            description: req.description,
            interests: req.interests,
            picture_url: None,
        },
        picture,
    };

    let (user, token) = register_account(&state, account).await?;
    Ok((StatusCode::CREATED, login_response(&state, user, token)).into_response())
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = extract_token(&headers) {
        state.auth.sign_out(&token)?;
    }

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    Ok(response)
}

/// Request a password reset mail. Unknown addresses get the same answer.
pub async fn auth_reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<StatusCode> {
    state.auth.request_password_reset(&req.email)?;
    Ok(StatusCode::ACCEPTED)
}

/// Set a new password with a reset token.
pub async fn auth_reset_confirm(
    State(state): State<AppState>,
    Json(req): Json<ResetConfirmRequest>,
) -> Result<StatusCode> {
    state
        .auth
        .confirm_password_reset(&req.token, &req.password)?;
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

// ============================================================================
// PROFILE API
// ============================================================================

/// Profile with the transient "updated" notice.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    profile: Profile,
    updated: bool,
}

/// Get the signed-in user's profile.
pub async fn profile_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let profile = state.profiles.load(&user.id).await;

    Ok(Json(ProfileResponse {
        profile,
        updated: state.profiles.is_recently_updated(&user.id),
    }))
}

/// Overwrite the signed-in user's profile.
pub async fn profile_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(profile): Json<Profile>,
) -> Result<Json<ProfileResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.profiles.save(&user.id, &profile)?;

    Ok(Json(ProfileResponse {
        profile: state.profiles.load(&user.id).await,
        updated: true,
    }))
}

/// List selectable genres.
pub async fn genres_list(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(genre::list_genres(&state.db)?))
}

// ============================================================================
// BOOKS API
// ============================================================================

/// Book upload request.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    genres: Vec<String>,
    image_base64: String,
}

/// List the signed-in user's books.
pub async fn books_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserBook>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.listings.list(&user.id)?))
}

/// Upload a book picture and add the listing.
pub async fn books_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UserBook>)> {
    let user = get_authenticated_user(&state, &headers).await?;

    let image = STANDARD
        .decode(req.image_base64.trim())
        .map_err(|_| AppError::Field {
            field: "picture",
            message: "Picture is not valid base64".to_string(),
        })?;

    let book = state
        .listings
        .upload(
            &user.id,
            NewListing {
                title: req.title,
                author: req.author,
                genres: req.genres,
                image,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(book)))
}

/// Delete a listing by title.
pub async fn books_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(title): Path<String>,
) -> Result<Json<DeleteOutcome>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let outcome = state.listings.delete(&user.id, &title).await;

    if !outcome.found {
        return Err(AppError::NotFound(format!("Book '{}'", title)));
    }
    Ok(Json(outcome))
}

// ============================================================================
// FEED API
// ============================================================================

/// Feed position as seen by the client.
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    current: Option<FeedBook>,
    index: usize,
    total: usize,
    no_more_books: bool,
}

impl From<FeedCursor> for FeedResponse {
    fn from(cursor: FeedCursor) -> Self {
        Self {
            current: cursor.current().cloned(),
            index: cursor.index,
            total: cursor.books.len(),
            no_more_books: cursor.no_more_books,
        }
    }
}

/// Fetch a fresh feed for the session.
pub async fn feed_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<FeedResponse>> {
    let (user, token) = get_authenticated_session(&state, &headers)?;
    let books = state.catalog.feed(&user.id).await?;
    Ok(Json(state.swipes.load_feed(&token, books).into()))
}

/// Like the current book.
pub async fn feed_like(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FeedResponse>> {
    swipe(&state, &headers, FeedCursor::like)
}

/// Dislike the current book.
pub async fn feed_dislike(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FeedResponse>> {
    swipe(&state, &headers, FeedCursor::dislike)
}

fn swipe(
    state: &AppState,
    headers: &HeaderMap,
    action: fn(&mut FeedCursor, &mut SwipeState),
) -> Result<Json<FeedResponse>> {
    let (_, token) = get_authenticated_session(state, headers)?;
    let cursor = state
        .swipes
        .swipe(&token, action)
        .ok_or_else(|| AppError::NotFound("No feed loaded for this session".to_string()))?;
    Ok(Json(cursor.into()))
}

/// Liked and disliked books of the session.
pub async fn history_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SwipeState>> {
    let (_, token) = get_authenticated_session(&state, &headers)?;
    Ok(Json(state.swipes.history(&token)))
}

// ============================================================================
// OBJECT DOWNLOAD
// ============================================================================

/// Download URL query.
#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    token: Option<String>,
}

/// Serve a stored object. The URL token must match the object path.
pub async fn storage_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response> {
    if query.token.as_deref() != Some(storage::download_token(&path).as_str()) {
        return Err(AppError::NotFound(format!("Object {}", path)));
    }

    let data = state.storage.read(&path).await?;
    let mime = image::guess_format(&data)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok(build_response(StatusCode::OK, mime, data))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract the session token from the Authorization header or the cookie.
pub(super) fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());

    bearer.or_else(|| {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
    })
}

/// `Set-Cookie` value for a new session.
pub(super) fn session_cookie(token: &str, days: u32) -> HeaderValue {
    let value = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        u64::from(days) * 86_400
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| clear_session_cookie())
}

/// `Set-Cookie` value that removes the session cookie.
pub(super) fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("bookswap_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Get authenticated user and session token.
fn get_authenticated_session(state: &AppState, headers: &HeaderMap) -> Result<(db::User, String)> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing session".to_string()))?;

    let user = state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))?;
    Ok((user, token))
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    get_authenticated_session(state, headers).map(|(user, _)| user)
}
