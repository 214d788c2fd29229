//! HTTP server and routes.

pub(crate) mod handlers;
pub(crate) mod pages;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Largest accepted request body (picture uploads).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let page_routes = Router::new()
        .route("/", get(pages::welcome))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route("/login/reset", post(pages::reset_submit))
        .route("/login/reset/confirm", post(pages::reset_confirm_submit))
        .route("/signup", get(pages::signup_page).post(pages::signup_submit))
        .route("/logout", post(pages::logout_submit))
        .route("/home", get(pages::home))
        .route("/home/like", post(pages::home_like))
        .route("/home/dislike", post(pages::home_dislike))
        .route("/messages", get(pages::messages))
        .route("/history", get(pages::history))
        .route("/profile", get(pages::profile).post(pages::profile_submit))
        .route("/profile/books", post(pages::book_upload_submit))
        .route("/profile/books/delete", post(pages::book_delete_submit));

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/signup", post(handlers::auth_signup))
        .route("/logout", post(handlers::auth_logout))
        .route("/reset-password", post(handlers::auth_reset_password))
        .route(
            "/reset-password/confirm",
            post(handlers::auth_reset_confirm),
        )
        .route("/me", get(handlers::auth_me));

    let api_routes = Router::new()
        .route(
            "/profile",
            get(handlers::profile_get).put(handlers::profile_put),
        )
        .route("/genres", get(handlers::genres_list))
        .route(
            "/books",
            get(handlers::books_list).post(handlers::books_upload),
        )
        .route("/books/{title}", delete(handlers::books_delete))
        // Swipe feed, scoped to the session
        .route("/feed", get(handlers::feed_get))
        .route("/feed/like", post(handlers::feed_like))
        .route("/feed/dislike", post(handlers::feed_dislike))
        .route("/history", get(handlers::history_get));

    Router::new()
        .merge(page_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .route("/storage/o/{path}", get(handlers::storage_object))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
