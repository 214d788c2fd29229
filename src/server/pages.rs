//! Server-rendered web pages.

use super::handlers::{
    NewAccount, clear_session_cookie, extract_token, register_account, session_cookie,
};
use crate::auth::INVALID_CREDENTIALS;
use crate::db::User;
use crate::error::{AppError, Result};
use crate::genre;
use crate::listing::NewListing;
use crate::profile::Profile;
use crate::server::AppState;
use crate::swipe::{FeedCursor, SwipeState};
use axum::{
    Form,
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write;

const STYLE: &str = r#"
        body { font-family: system-ui, sans-serif; margin: 0; background: #f7f7f7; color: #333; }
        nav { display: flex; gap: 1rem; align-items: center; padding: 0.75rem 1.5rem; background: #fff; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
        nav a { color: #718096; text-decoration: none; }
        nav a.active { color: #3182ce; font-weight: bold; }
        nav form { margin-left: auto; }
        main { max-width: 640px; margin: 2rem auto; padding: 0 1rem; }
        .card { background: #fff; padding: 1.5rem; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); margin-bottom: 1rem; }
        .error { color: #c53030; }
        .notice { color: #2f855a; font-weight: bold; }
        .book img { max-width: 100%; max-height: 420px; border-radius: 8px; }
        .tags label { display: inline-block; margin-right: 0.75rem; }
        input[type=text], input[type=email], input[type=password], textarea { width: 100%; padding: 0.4rem; margin: 0.25rem 0 0.75rem; box-sizing: border-box; }
        button { padding: 0.5rem 1rem; border: 0; border-radius: 6px; background: #3182ce; color: #fff; cursor: pointer; }
        button.secondary { background: #718096; }
        .bubble { background: #fff; padding: 0.75rem; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); margin: 0.5rem 0; }
"#;

const NAV_ITEMS: &[(&str, &str)] = &[
    ("/home", "Home"),
    ("/messages", "Messages"),
    ("/history", "History"),
    ("/profile", "Profile"),
];

/// Wrap page content in the common document. `nav` carries the active path
/// and the signed-in email.
fn layout(site: &str, title: &str, nav: Option<(&str, &str)>, body: &str) -> Html<String> {
    let mut nav_html = String::new();
    if let Some((active, email)) = nav {
        nav_html.push_str("<nav>");
        for (path, label) in NAV_ITEMS {
            let class = if *path == active { " class=\"active\"" } else { "" };
            let _ = write!(nav_html, r#"<a href="{}"{}>{}</a>"#, path, class, label);
        }
        let _ = write!(
            nav_html,
            r#"<form method="post" action="/logout"><span>{}</span> <button class="secondary">Sign out</button></form></nav>"#,
            text(email)
        );
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title} - {site}</title>
    <style>{style}</style>
</head>
<body>
    {nav}
    <main>
{body}
    </main>
</body>
</html>"#,
        title = text(title),
        site = text(site),
        style = STYLE,
        nav = nav_html,
        body = body,
    ))
}

fn error_html(message: Option<&str>) -> String {
    message
        .map(|m| format!(r#"<p class="error">{}</p>"#, text(m)))
        .unwrap_or_default()
}

/// Checkbox group over the genre vocabulary.
fn genre_checkboxes(name: &str, genres: &[String], selected: &[String]) -> String {
    let mut html = String::from(r#"<div class="tags">"#);
    for genre in genres {
        let checked = if selected.iter().any(|s| s.eq_ignore_ascii_case(genre)) {
            " checked"
        } else {
            ""
        };
        let _ = write!(
            html,
            r#"<label><input type="checkbox" name="{}" value="{}"{}> {}</label>"#,
            name,
            attr(genre),
            checked,
            text(genre)
        );
    }
    html.push_str("</div>");
    html
}

fn see_other_with_cookie(to: &str, cookie: axum::http::HeaderValue) -> Response {
    let mut response = Redirect::to(to).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    response
}

/// Resolve the signed-in user of a page request, or redirect to the welcome page.
pub(super) fn require_page_user(
    state: &AppState,
    headers: &HeaderMap,
) -> std::result::Result<(User, String), Redirect> {
    let token = extract_token(headers).ok_or_else(|| Redirect::to("/"))?;
    match state.current_user(Some(&token)) {
        Some(user) => Ok((user, token)),
        None => Err(Redirect::to("/")),
    }
}

/// Text fields and the uploaded file of a multipart form.
#[derive(Default)]
struct MultipartForm {
    fields: HashMap<String, Vec<String>>,
    file: Option<(String, Vec<u8>)>,
}

impl MultipartForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::InvalidInput(format!("Malformed form: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Malformed upload: {}", e)))?;
                if !data.is_empty() {
                    form.file = Some((file_name, data.to_vec()));
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Malformed form: {}", e)))?;
                form.fields.entry(name).or_default().push(value);
            }
        }
        Ok(form)
    }

    fn one(&self, name: &str) -> String {
        self.fields
            .get(name)
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_default()
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.fields.get(name).cloned().unwrap_or_default()
    }
}

// ============================================================================
// PUBLIC PAGES
// ============================================================================

/// Welcome page.
pub async fn welcome(State(state): State<AppState>) -> Html<String> {
    let body = r#"<div class="card">
        <h1>Swap the books you've read for the ones you haven't.</h1>
        <p><a href="/login"><button>Log in</button></a> <a href="/signup"><button class="secondary">Sign Up</button></a></p>
    </div>"#;
    layout(&state.config.server.title, "Welcome", None, body)
}

/// Login page query.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    reset: Option<String>,
}

/// Login form.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

/// Password reset request form.
#[derive(Debug, Deserialize)]
pub struct ResetForm {
    email: String,
}

/// New password form reached from the reset link.
#[derive(Debug, Deserialize)]
pub struct ResetConfirmForm {
    token: String,
    password: String,
}

fn render_login(state: &AppState, error: Option<&str>, notice: Option<&str>) -> Html<String> {
    let notice = notice
        .map(|n| format!(r#"<p class="notice">{}</p>"#, text(n)))
        .unwrap_or_default();
    let body = format!(
        r#"<div class="card">
        <h1>Log in</h1>
        {notice}{error}
        <form method="post" action="/login">
            <label>Email<input type="email" name="email" required></label>
            <label>Password<input type="password" name="password" required></label>
            <button>Log in</button>
            <a href="/signup"><button type="button" class="secondary">Sign Up</button></a>
        </form>
    </div>
    <div class="card">
        <h2>Forgot your password?</h2>
        <form method="post" action="/login/reset">
            <label>Email<input type="email" name="email" required></label>
            <button class="secondary">Send reset link</button>
        </form>
    </div>"#,
        notice = notice,
        error = error_html(error),
    );
    layout(&state.config.server.title, "Log in", None, &body)
}

/// Login page, or the new-password form when opened from a reset link.
pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Html<String> {
    let Some(token) = query.reset else {
        return render_login(&state, None, None);
    };

    let body = format!(
        r#"<div class="card">
        <h1>Choose a new password</h1>
        <form method="post" action="/login/reset/confirm">
            <input type="hidden" name="token" value="{}">
            <label>New password<input type="password" name="password" required minlength="6"></label>
            <button>Save password</button>
        </form>
    </div>"#,
        attr(&token)
    );
    layout(&state.config.server.title, "Reset password", None, &body)
}

/// Sign in and continue to the profile page.
pub async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    match state.auth.sign_in(&form.email, &form.password) {
        Ok((_, token)) => Ok(see_other_with_cookie(
            "/profile",
            session_cookie(&token, state.config.auth.session_days),
        )),
        Err(AppError::Field { .. }) => Ok((
            StatusCode::UNAUTHORIZED,
            render_login(&state, Some(INVALID_CREDENTIALS), None),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// Send a reset link. The answer does not reveal whether the address exists.
pub async fn reset_submit(
    State(state): State<AppState>,
    Form(form): Form<ResetForm>,
) -> Result<Html<String>> {
    state.auth.request_password_reset(&form.email)?;
    Ok(render_login(
        &state,
        None,
        Some("If an account exists for that address, a reset link is on its way."),
    ))
}

/// Store the new password from a reset link.
pub async fn reset_confirm_submit(
    State(state): State<AppState>,
    Form(form): Form<ResetConfirmForm>,
) -> Result<Response> {
    match state.auth.confirm_password_reset(&form.token, &form.password) {
        Ok(()) => Ok(render_login(&state, None, Some("Password updated. Please log in.")).into_response()),
        Err(AppError::InvalidInput(message)) => Ok((
            StatusCode::BAD_REQUEST,
            render_login(&state, Some(&message), None),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

fn render_signup(state: &AppState, error: Option<&str>) -> Result<Html<String>> {
    let genres = genre::list_genres(&state.db)?;
    let body = format!(
        r#"<div class="card">
        <h1>Sign Up</h1>
        {error}
        <form method="post" action="/signup" enctype="multipart/form-data">
            <label>Email<input type="email" name="email" required></label>
            <label>Password<input type="password" name="password" required minlength="6"></label>
            <label>Name<input type="text" name="name" required></label>
            <label>About you<textarea name="description" rows="3"></textarea></label>
            <p>Interests</p>
            {genres}
            <label>Profile picture<input type="file" name="picture" accept="image/*"></label>
            <p><button>Create account</button></p>
        </form>
    </div>"#,
        error = error_html(error),
        genres = genre_checkboxes("interests", &genres, &[]),
    );
    Ok(layout(&state.config.server.title, "Sign Up", None, &body))
}

/// Signup page.
pub async fn signup_page(State(state): State<AppState>) -> Result<Html<String>> {
    render_signup(&state, None)
}

/// Create the account and profile, then continue to the profile page.
pub async fn signup_submit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response> {
    let form = MultipartForm::read(multipart).await?;

    let account = NewAccount {
        email: form.one("email"),
        password: form.one("password"),
        profile: Profile {
            name: form.one("name").trim().to_string(),
            description: form.one("description"),
            interests: form.all("interests"),
            picture_url: None,
        },
        picture: form.file,
    };

    match register_account(&state, account).await {
        Ok((_, token)) => Ok(see_other_with_cookie(
            "/profile",
            session_cookie(&token, state.config.auth.session_days),
        )),
        Err(AppError::Field { message, .. }) | Err(AppError::InvalidInput(message)) => Ok((
            StatusCode::BAD_REQUEST,
            render_signup(&state, Some(&message))?,
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// Sign out and go back to the welcome page.
pub async fn logout_submit(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = extract_token(&headers) {
        state.auth.sign_out(&token)?;
    }
    Ok(see_other_with_cookie("/", clear_session_cookie()))
}

// ============================================================================
// SIGNED-IN PAGES
// ============================================================================

/// Swipe page: one book at a time with like and dislike buttons.
pub async fn home(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let (user, token) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return Ok(redirect.into_response()),
    };

    let cursor = match state.swipes.cursor(&token) {
        Some(cursor) => cursor,
        None => match state.catalog.feed(&user.id).await {
            Ok(books) => state.swipes.load_feed(&token, books),
            Err(e) => {
                // Not cached, so the next visit retries.
                tracing::error!(user_id = %user.id, error = %e, "Error fetching books");
                FeedCursor::default()
            }
        },
    };

    let body = match cursor.current() {
        Some(book) => format!(
            r#"<div class="card book">
        <h2>{title}</h2>
        <img src="{image}" alt="{alt}">
        <p>Book {position} of {total}</p>
        <form method="post" action="/home/dislike" style="display:inline"><button class="secondary">Dislike</button></form>
        <form method="post" action="/home/like" style="display:inline"><button>Like</button></form>
    </div>"#,
            title = text(&book.title),
            image = attr(&book.image),
            alt = attr(&book.title),
            position = cursor.index + 1,
            total = cursor.books.len(),
        ),
        None => r#"<div class="card"><h2>No new books</h2><p>Check back later for more books to swap.</p></div>"#
            .to_string(),
    };

    Ok(layout(
        &state.config.server.title,
        "Home",
        Some(("/home", user.email.as_str())),
        &body,
    )
    .into_response())
}

fn page_swipe(
    state: &AppState,
    headers: &HeaderMap,
    action: fn(&mut FeedCursor, &mut SwipeState),
) -> Redirect {
    match require_page_user(state, headers) {
        Ok((_, token)) => {
            state.swipes.swipe(&token, action);
            Redirect::to("/home")
        }
        Err(redirect) => redirect,
    }
}

/// Like the book on screen.
pub async fn home_like(State(state): State<AppState>, headers: HeaderMap) -> Redirect {
    page_swipe(&state, &headers, FeedCursor::like)
}

/// Dislike the book on screen.
pub async fn home_dislike(State(state): State<AppState>, headers: HeaderMap) -> Redirect {
    page_swipe(&state, &headers, FeedCursor::dislike)
}

const CONVERSATION: &[(&str, &str)] = &[
    ("John Doe", "See you there!"),
    ("Jane Smith", "I don't think I will."),
    ("John Doe", "Come on, it's a first edition."),
    ("Jane Smith", "Fine. Bring the book."),
];

/// Messages page (static conversation).
pub async fn messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (user, _) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };

    let mut body = String::from(r#"<div class="card"><h1>Messages</h1>"#);
    for (speaker, line) in CONVERSATION {
        let _ = write!(
            body,
            r#"<div class="bubble"><strong>{}</strong><p>{}</p></div>"#,
            speaker, line
        );
    }
    body.push_str("</div>");

    layout(
        &state.config.server.title,
        "Messages",
        Some(("/messages", user.email.as_str())),
        &body,
    )
    .into_response()
}

fn book_list_html(heading: &str, books: &[crate::catalog::FeedBook]) -> String {
    let mut html = format!(r#"<div class="card"><h2>{}</h2>"#, heading);
    if books.is_empty() {
        html.push_str("<p>Nothing yet.</p>");
    }
    for book in books {
        let _ = write!(
            html,
            r#"<p><img src="{}" alt="" width="48"> {}</p>"#,
            attr(&book.image),
            text(&book.title)
        );
    }
    html.push_str("</div>");
    html
}

/// Liked and disliked books of this session.
pub async fn history(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (user, token) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return redirect.into_response(),
    };

    let swipes = state.swipes.history(&token);
    let body = format!(
        "{}{}",
        book_list_html("Liked", &swipes.liked),
        book_list_html("Disliked", &swipes.disliked)
    );

    layout(
        &state.config.server.title,
        "History",
        Some(("/history", user.email.as_str())),
        &body,
    )
    .into_response()
}

async fn render_profile(state: &AppState, user: &User, error: Option<&str>) -> Result<Html<String>> {
    let profile = state.profiles.load(&user.id).await;
    let books = state.listings.list(&user.id).unwrap_or_else(|e| {
        tracing::error!(user_id = %user.id, error = %e, "Error fetching user books");
        Vec::new()
    });
    let genres = genre::list_genres(&state.db).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Error fetching genres");
        Vec::new()
    });

    let notice = if state.profiles.is_recently_updated(&user.id) {
        r#"<p class="notice">Profile updated!</p>"#
    } else {
        ""
    };
    let picture = profile
        .picture_url
        .as_deref()
        .map(|url| format!(r#"<img src="{}" alt="" width="96">"#, attr(url)))
        .unwrap_or_default();

    let mut shelf = String::new();
    if books.is_empty() {
        shelf.push_str("<p>No books listed yet.</p>");
    }
    for book in &books {
        let _ = write!(
            shelf,
            r#"<div class="bubble"><img src="{picture}" alt="" width="64"> <strong>{title}</strong> {author}
            <form method="post" action="/profile/books/delete" style="display:inline">
                <input type="hidden" name="title" value="{title_attr}"><button class="secondary">Delete</button>
            </form></div>"#,
            picture = attr(&book.picture),
            title = text(&book.title),
            author = text(&book.author),
            title_attr = attr(&book.title),
        );
    }

    let body = format!(
        r#"<div class="card">
        <h1>Profile</h1>
        {notice}{error}
        {picture}
        <form method="post" action="/profile" enctype="multipart/form-data">
            <label>Name<input type="text" name="name" value="{name}" required></label>
            <label>About you<textarea name="description" rows="3">{description}</textarea></label>
            <p>Interests</p>
            {interests}
            <p><button>Save changes</button></p>
        </form>
    </div>
    <div class="card">
        <h2>My books</h2>
        {shelf}
        <h3>Add a book</h3>
        <form method="post" action="/profile/books" enctype="multipart/form-data">
            <label>Title<input type="text" name="title" required></label>
            <label>Author<input type="text" name="author"></label>
            {book_genres}
            <label>Picture<input type="file" name="picture" accept="image/*" required></label>
            <p><button>Upload</button></p>
        </form>
    </div>"#,
        notice = notice,
        error = error_html(error),
        picture = picture,
        name = attr(&profile.name),
        description = text(&profile.description),
        interests = genre_checkboxes("interests", &genres, &profile.interests),
        shelf = shelf,
        book_genres = genre_checkboxes("genres", &genres, &[]),
    );

    Ok(layout(
        &state.config.server.title,
        "Profile",
        Some(("/profile", user.email.as_str())),
        &body,
    ))
}

/// Profile page with the user's books.
pub async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    match require_page_user(&state, &headers) {
        Ok((user, _)) => Ok(render_profile(&state, &user, None).await?.into_response()),
        Err(redirect) => Ok(redirect.into_response()),
    }
}

/// Save profile changes.
pub async fn profile_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response> {
    let (user, _) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return Ok(redirect.into_response()),
    };

    let form = MultipartForm::read(multipart).await?;
    let profile = Profile {
        name: form.one("name").trim().to_string(),
        description: form.one("description"),
        interests: form.all("interests"),
        picture_url: None,
    };

    if let Err(e) = state.profiles.save(&user.id, &profile) {
        tracing::error!(user_id = %user.id, error = %e, "Error saving profile");
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            render_profile(&state, &user, Some("Could not save your profile.")).await?,
        )
            .into_response());
    }

    Ok(Redirect::to("/profile").into_response())
}

/// Upload a book from the profile page.
pub async fn book_upload_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response> {
    let (user, _) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return Ok(redirect.into_response()),
    };

    let form = MultipartForm::read(multipart).await?;
    let listing = NewListing {
        title: form.one("title"),
        author: form.one("author"),
        genres: form.all("genres"),
        image: form.file.map(|(_, data)| data).unwrap_or_default(),
    };

    match state.listings.upload(&user.id, listing).await {
        Ok(_) => Ok(Redirect::to("/profile").into_response()),
        Err(AppError::Field { message, .. }) | Err(AppError::Conflict(message)) => Ok((
            StatusCode::BAD_REQUEST,
            render_profile(&state, &user, Some(&message)).await?,
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// Delete form.
#[derive(Debug, Deserialize)]
pub struct DeleteBookForm {
    title: String,
}

/// Delete a book from the profile page.
pub async fn book_delete_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<DeleteBookForm>,
) -> Redirect {
    let (user, _) = match require_page_user(&state, &headers) {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };

    let outcome = state.listings.delete(&user.id, &form.title).await;
    tracing::info!(user_id = %user.id, title = %form.title, ?outcome, "Deleted book");
    Redirect::to("/profile")
}
