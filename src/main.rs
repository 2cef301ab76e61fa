use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use scrivener::auth::{MIN_PASSWORD_LEN, hash_password, validate_password};
use scrivener::clock::{Clock, SystemClock};
use scrivener::config::ServerConfig;
use scrivener::server::validation::{validate_email, validate_username};
use scrivener::server::{AppState, create_router};
use scrivener::store::{SqliteStore, Store};
use scrivener::types::{Role, User};

const DEFAULT_TAGS: [&str; 4] = ["General", "Tutorial", "News", "Documentation"];

#[derive(Parser)]
#[command(name = "scrivener")]
#[command(about = "A versioned content server", long_about = None)]
struct Cli {
    /// TOML configuration file; flags and environment variables override it
    #[arg(long, global = true, env = "SCRIVENER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to
        #[arg(long, env = "SCRIVENER_HOST")]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short, env = "SCRIVENER_PORT")]
        port: Option<u16>,

        /// Data directory for the database and uploads
        #[arg(long, env = "SCRIVENER_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Lifetime of issued API tokens
        #[arg(long, env = "SCRIVENER_TOKEN_TTL_SECONDS")]
        token_ttl_seconds: Option<i64>,

        /// Largest accepted upload
        #[arg(long, env = "SCRIVENER_MAX_UPLOAD_BYTES")]
        max_upload_bytes: Option<usize>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Initialize the server (create database, default tags and an admin user)
    Init {
        /// Data directory for the database and uploads
        #[arg(long, env = "SCRIVENER_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Admin username
        #[arg(long, default_value = "admin")]
        username: String,

        /// Admin email
        #[arg(long, default_value = "admin@example.com")]
        email: String,

        /// Admin password (prompted for when omitted)
        #[arg(long, env = "SCRIVENER_ADMIN_PASSWORD")]
        password: Option<String>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Create an additional admin user
    CreateAdmin {
        username: String,

        email: String,

        /// Password (prompted for when omitted)
        #[arg(long, env = "SCRIVENER_ADMIN_PASSWORD")]
        password: Option<String>,

        /// Data directory for the database and uploads
        #[arg(long, env = "SCRIVENER_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

fn open_store(config: &ServerConfig) -> anyhow::Result<SqliteStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    Ok(store)
}

fn resolve_password(password: Option<String>, non_interactive: bool) -> anyhow::Result<String> {
    if let Some(password) = password {
        validate_password(&password)?;
        return Ok(password);
    }

    if non_interactive {
        bail!("--password is required with --non-interactive");
    }

    let password = inquire::Password::new("Admin password:")
        .with_validator(|input: &str| {
            if input.chars().count() < MIN_PASSWORD_LEN {
                Ok(inquire::validator::Validation::Invalid(
                    format!("Password must be at least {MIN_PASSWORD_LEN} characters").into(),
                ))
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()?;

    Ok(password)
}

fn create_admin_user(
    store: &dyn Store,
    clock: &dyn Clock,
    username: String,
    email: String,
    password: &str,
) -> anyhow::Result<User> {
    validate_username(&username).map_err(|e| anyhow!(e.message))?;
    validate_email(&email).map_err(|e| anyhow!(e.message))?;

    if store.get_user_by_username(&username)?.is_some() {
        bail!("Username '{username}' is already taken");
    }
    if store.get_user_by_email(&email)?.is_some() {
        bail!("Email '{email}' is already registered");
    }

    let now = clock.now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        email,
        password_hash: hash_password(password)?,
        role: Role::Admin,
        first_name: None,
        last_name: None,
        bio: None,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };

    store.create_user(&user)?;
    Ok(user)
}

fn run_init(
    config: &ServerConfig,
    username: String,
    email: String,
    password: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = open_store(config)?;

    if store.has_admin_user()? {
        bail!(
            "Server already initialized. Use 'scrivener admin create-admin' to add another admin."
        );
    }

    let password = resolve_password(password, non_interactive)?;

    let clock = SystemClock;
    for name in DEFAULT_TAGS {
        store.get_or_create_tag(name, clock.now())?;
    }

    let user = create_admin_user(&store, &clock, username, email, &password)?;

    println!();
    println!("========================================");
    println!("Initialized {}", config.db_path().display());
    println!("Default tags: {}", DEFAULT_TAGS.join(", "));
    println!("Admin user '{}' <{}> created", user.username, user.email);
    println!("========================================");
    println!();

    Ok(())
}

fn run_create_admin(
    config: &ServerConfig,
    username: String,
    email: String,
    password: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let password = resolve_password(password, non_interactive)?;
    let user = create_admin_user(&store, &SystemClock, username, email, &password)?;

    println!("Admin user '{}' <{}> created", user.username, user.email);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrivener=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init {
                data_dir,
                username,
                email,
                password,
                non_interactive,
            } => {
                if let Some(data_dir) = data_dir {
                    config.data_dir = data_dir;
                }
                run_init(&config, username, email, password, non_interactive)?;
            }
            AdminCommands::CreateAdmin {
                username,
                email,
                password,
                data_dir,
                non_interactive,
            } => {
                if let Some(data_dir) = data_dir {
                    config.data_dir = data_dir;
                }
                run_create_admin(&config, username, email, password, non_interactive)?;
            }
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            token_ttl_seconds,
            max_upload_bytes,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(ttl) = token_ttl_seconds {
                config.token_ttl_seconds = ttl;
            }
            if let Some(max) = max_upload_bytes {
                config.max_upload_bytes = max;
            }
            config.validate()?;

            if !config.db_path().exists() {
                bail!("Server not initialized. Run 'scrivener admin init' first.");
            }

            let store = SqliteStore::new(config.db_path())?;
            store.initialize()?;
            if !store.has_admin_user()? {
                bail!("Server not initialized. Run 'scrivener admin init' first.");
            }

            let addr = config.socket_addr()?;
            let state = Arc::new(AppState::new(
                Arc::new(store),
                Arc::new(SystemClock),
                config,
            ));
            let app = create_router(state);

            info!("Starting server on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
