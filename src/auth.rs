//! Authentication module.

use crate::db::{Database, PasswordReset, Session, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use tokio::sync::broadcast;

/// Message shown for any failed sign-in.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials. Please try again.";

/// Message shown when signing up with an email that is already registered.
pub const EMAIL_TAKEN: &str = "Username already exists";

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a secure random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Auth-state change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A session was opened.
    SignedIn {
        /// User ID.
        user_id: String,
        /// New session token.
        token: String,
    },
    /// A session was closed.
    SignedOut {
        /// User ID.
        user_id: String,
        /// Closed session token.
        token: String,
    },
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
    reset_token_minutes: u32,
    registration_enabled: bool,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        db: Database,
        session_duration_days: u32,
        reset_token_minutes: u32,
        registration_enabled: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            session_duration_days,
            reset_token_minutes,
            registration_enabled,
            events,
        }
    }

    /// Subscribe to auth-state changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Register a new account.
    ///
    /// An email that is already registered is reported as a field error on
    /// `email` and nothing is created.
    pub fn sign_up(&self, email: &str, password: &str) -> Result<User> {
        if !self.registration_enabled {
            return Err(AppError::InvalidInput(
                "Registration is disabled".to_string(),
            ));
        }

        if self.db.get_user_by_email(email.trim())?.is_some() {
            return Err(AppError::Field {
                field: "email",
                message: EMAIL_TAKEN.to_string(),
            });
        }

        self.create_user(email, password)
    }

    /// Create a new user (admin function).
    pub fn create_user(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim();

        // Validate email
        if email.is_empty() || email.len() > 254 {
            return Err(AppError::Field {
                field: "email",
                message: "Email is required".to_string(),
            });
        }

        let valid_shape = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_shape || email.chars().any(char::is_whitespace) {
            return Err(AppError::Field {
                field: "email",
                message: "Invalid email address".to_string(),
            });
        }

        // Validate password
        if password.len() < 6 {
            return Err(AppError::Field {
                field: "password",
                message: "Password must be at least 6 characters".to_string(),
            });
        }

        let password_hash = hash_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash,
            created_at: now_timestamp(),
            last_login: None,
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Sign in and create a session.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<(User, String)> {
        let invalid = || AppError::Field {
            field: "password",
            message: INVALID_CREDENTIALS.to_string(),
        };

        let user = self.db.get_user_by_email(email.trim())?.ok_or_else(invalid)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(invalid());
        }

        // Update last login
        self.db.update_user_last_login(&user.id)?;

        // Create session
        let token = generate_token();
        let expires_at = now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60);

        let session = Session {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at,
        };

        self.db.create_session(&session)?;
        self.notify(AuthEvent::SignedIn {
            user_id: user.id.clone(),
            token: token.clone(),
        });

        Ok((user, token))
    }

    /// Validate a session token and return the user.
    pub fn validate_token(&self, token: &str) -> Result<Option<User>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        // Check expiration
        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            self.notify(AuthEvent::SignedOut {
                user_id: session.user_id,
                token: session.token,
            });
            return Ok(None);
        }

        self.db.get_user_by_id(&session.user_id)
    }

    /// Current user for a token. Any failure counts as signed out.
    pub fn current_user(&self, token: &str) -> Option<User> {
        match self.validate_token(token) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, treating as signed out");
                None
            }
        }
    }

    /// Sign out (delete session).
    pub fn sign_out(&self, token: &str) -> Result<()> {
        let session = self.db.get_session(token)?;
        self.db.delete_session(token)?;

        if let Some(session) = session {
            self.notify(AuthEvent::SignedOut {
                user_id: session.user_id,
                token: session.token,
            });
        }
        Ok(())
    }

    /// Request a password reset e-mail.
    ///
    /// Unknown addresses are accepted silently. Returns the reset token when
    /// one was issued; mail delivery is out of scope so the token is logged.
    pub fn request_password_reset(&self, email: &str) -> Result<Option<String>> {
        let Some(user) = self.db.get_user_by_email(email.trim())? else {
            tracing::info!("Password reset requested for unknown address");
            return Ok(None);
        };

        let reset = PasswordReset {
            token: generate_token(),
            user_id: user.id.clone(),
            expires_at: now_timestamp() + self.reset_token_minutes as i64 * 60,
        };
        self.db.create_password_reset(&reset)?;

        tracing::info!(
            user_id = %user.id,
            reset_link = %format!("/login?reset={}", reset.token),
            "Password reset email queued"
        );
        Ok(Some(reset.token))
    }

    /// Complete a password reset and close every session of the user.
    pub fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        let reset = self
            .db
            .take_password_reset(token)?
            .filter(|r| r.expires_at >= now_timestamp())
            .ok_or_else(|| AppError::InvalidInput("Invalid or expired reset token".to_string()))?;

        self.set_password(&reset.user_id, new_password)?;

        for token in self.db.delete_user_sessions(&reset.user_id)? {
            self.notify(AuthEvent::SignedOut {
                user_id: reset.user_id.clone(),
                token,
            });
        }
        Ok(())
    }

    /// Change user password by email.
    pub fn change_password(&self, email: &str, new_password: &str) -> Result<bool> {
        match self.db.get_user_by_email(email)? {
            Some(user) => {
                self.set_password(&user.id, new_password)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_password(&self, user_id: &str, new_password: &str) -> Result<()> {
        if new_password.len() < 6 {
            return Err(AppError::Field {
                field: "password",
                message: "Password must be at least 6 characters".to_string(),
            });
        }

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(user_id, &password_hash)?;
        Ok(())
    }

    /// Purge expired sessions and reset tokens.
    ///
    /// Each purged session is announced as signed out. Returns how many
    /// sessions were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let sessions = self.db.cleanup_expired_sessions()?;
        let removed = sessions.len();
        for session in sessions {
            self.notify(AuthEvent::SignedOut {
                user_id: session.user_id,
                token: session.token,
            });
        }
        Ok(removed)
    }

    /// Delete a user by email, closing their sessions first.
    pub fn delete_user(&self, email: &str) -> Result<bool> {
        let Some(user) = self.db.get_user_by_email(email)? else {
            return Ok(false);
        };

        for token in self.db.delete_user_sessions(&user.id)? {
            self.notify(AuthEvent::SignedOut {
                user_id: user.id.clone(),
                token,
            });
        }
        self.db.delete_user(&user.id)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_generate_token() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_eq!(token1.len(), 43); // Base64 of 32 bytes
        assert_ne!(token1, token2);
    }

    #[test]
    fn test_sign_in_and_out_emit_events() {
        let auth = AuthService::new(Database::open_memory().unwrap(), 30, 60, true);
        let mut events = auth.subscribe();

        let user = auth.sign_up("ann@example.com", "secret1").unwrap();
        let (_, token) = auth.sign_in("ann@example.com", "secret1").unwrap();
        auth.sign_out(&token).unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::SignedIn {
                user_id: user.id.clone(),
                token: token.clone()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::SignedOut {
                user_id: user.id,
                token
            }
        );
    }
}
