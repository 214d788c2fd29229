//! bookswap server entry point.

use bookswap::{
    auth::AuthService,
    config::{Cli, Command, Config, DEFAULT_GENRES, GenreCommand, UserCommand},
    db::{self, Database},
    genre,
    profile::Profile,
    server::{self, AppState},
};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions and reset tokens are purged.
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, config).await,
        Some(Command::Genre { action }) => cmd_genre(action, &config),
        Some(Command::Reconcile { email }) => cmd_reconcile(email, config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(&config.database.path)?)
}

fn auth_service(db: Database, config: &Config) -> AuthService {
    AuthService::new(
        db,
        config.auth.session_days,
        config.auth.reset_token_minutes,
        config.auth.registration_enabled(),
    )
}

/// Initialize config, database and the genre vocabulary.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let db = open_database(&config)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.storage.root)?;
    println!("Initialized storage: {}", config.storage.root.display());

    for name in DEFAULT_GENRES {
        genre::add_genre(&db, name)?;
    }
    println!("Seeded {} genres", DEFAULT_GENRES.len());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: bookswap user add <email> --name <name>");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: Config) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let auth = auth_service(db.clone(), &config);

    match action {
        UserCommand::Add {
            email,
            password,
            name,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&email, &password)?;
            let state = AppState::new(config, db, auth);
            state.profiles.create(
                &user.id,
                &Profile {
                    name,
                    ..Profile::default()
                },
            )?;
            println!("Created user: {} (id: {})", user.email, user.id);
        }

        UserCommand::Del { email } => {
            let Some(user) = db.get_user_by_email(&email)? else {
                println!("User not found: {}", email);
                return Ok(());
            };

            let state = AppState::new(config, db.clone(), auth);
            for book in state.listings.list(&user.id)? {
                let outcome = state.listings.delete(&user.id, &book.title).await;
                if !outcome.image_deleted {
                    println!("  Could not delete picture of '{}'", book.title);
                }
            }
            db.delete_document(db::USER_BOOKS, &user.id)?;
            db.delete_document(db::PROFILES, &user.id)?;
            state.profiles.forget(&user.id)?;

            if state.auth.delete_user(&email)? {
                println!("Deleted user: {}", email);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<32} {:<36} LAST LOGIN", "EMAIL", "ID");
                println!("{}", "-".repeat(84));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            chrono::DateTime::from_timestamp(ts, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        })
                        .unwrap_or_else(|| "never".to_string());
                    println!("{:<32} {:<36} {}", user.email, user.id, last_login);
                }
            }
        }

        UserCommand::Passwd { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&email, &password)? {
                println!("Password changed for: {}", email);
            } else {
                println!("User not found: {}", email);
            }
        }
    }

    Ok(())
}

/// Genre vocabulary commands.
fn cmd_genre(action: GenreCommand, config: &Config) -> anyhow::Result<()> {
    let db = open_database(config)?;

    match action {
        GenreCommand::Add { name } => {
            genre::add_genre(&db, &name)?;
            println!("Added genre: {}", name.trim());
        }

        GenreCommand::Del { name } => {
            if genre::remove_genre(&db, &name)? {
                println!("Removed genre: {}", name);
            } else {
                println!("Genre not found: {}", name);
            }
        }

        GenreCommand::List => {
            let genres = genre::list_genres(&db)?;
            if genres.is_empty() {
                println!("No genres found. Run: bookswap init");
            }
            for name in genres {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

/// Delete book pictures no listing references.
async fn cmd_reconcile(email: Option<String>, config: Config) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let auth = auth_service(db.clone(), &config);

    let users = match email {
        Some(email) => match db.get_user_by_email(&email)? {
            Some(user) => vec![user],
            None => anyhow::bail!("User not found: {}", email),
        },
        None => auth.list_users()?,
    };

    let state = AppState::new(config, db, auth);
    let mut total = 0;
    for user in users {
        let removed = state.listings.reconcile(&user.id).await?;
        if removed > 0 {
            println!("{}: removed {} orphaned picture(s)", user.email, removed);
        }
        total += removed;
    }
    println!("Reconcile finished, {} picture(s) removed", total);

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookswap=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = open_database(&config)?;
    std::fs::create_dir_all(&config.storage.root)?;
    let auth = auth_service(db.clone(), &config);

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        storage = %config.storage.root.display(),
        "Starting bookswap server"
    );

    if genre::list_genres(&db)?.is_empty() {
        tracing::warn!("No genres configured. Seed them with: bookswap init");
    }

    let bind_addr = config.server.bind;
    let state = AppState::new(config, db, auth);
    state.spawn_session_listener();

    let auth = state.auth.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            match auth.purge_expired_sessions() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });

    let app = server::create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
