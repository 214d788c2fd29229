mod schema;

pub use schema::Database;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection holding one profile document per user.
pub const PROFILES: &str = "userProfiles";
/// Collection holding one book-list document per user.
pub const USER_BOOKS: &str = "userBooks";
/// Collection holding the genre vocabulary.
pub const GENRES: &str = "bookGenres";

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Email used for login.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Pending password reset.
#[derive(Debug, Clone)]
pub struct PasswordReset {
    /// One-time reset token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// A document read back from a collection.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document body.
    pub data: Value,
}

/// Merge `patch` into `target`.
///
/// Objects are merged key by key, recursively. Any other value
/// (arrays included) replaces the target value.
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
