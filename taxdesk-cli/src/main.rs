//! Taxdesk CLI - Command-line access to the Taxdesk CRM API
//!
//! Keeps the session between runs: store blobs and cookies live in the
//! configured state directory.

mod cookies;
mod session;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use session::CliSession;
use std::path::PathBuf;
use taxdesk_client::{
    AuthApi, ListParams, LoginOutcome, NotificationsApi, ResourceClient, ResourceKind,
};
use taxdesk_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success, ClientConfig,
    LoggingConfig, TaxdeskResult,
};
use taxdesk_store::Theme;
use tracing::info;

#[derive(Parser)]
#[command(name = "taxdesk")]
#[command(about = "Command-line client for the Taxdesk CRM API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "TAXDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Answer a pending second-factor challenge
    Verify {
        /// Verification code
        code: String,
    },

    /// Sign out and forget the session
    Logout,

    /// Show the signed-in user
    Whoami {
        /// Print the cached profile without contacting the API
        #[arg(long)]
        cached: bool,
    },

    /// List a collection
    List {
        /// contacts, cases, corporations, documents, messages, appointments, reports, notifications or users
        resource: ResourceKind,

        #[arg(long)]
        page: Option<u32>,

        /// Defaults to the saved page-size preference
        #[arg(long)]
        page_size: Option<u32>,

        #[arg(short, long)]
        search: Option<String>,

        #[arg(long)]
        ordering: Option<String>,

        /// Extra filter as key=value; repeatable
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Fetch a single record
    Get {
        resource: ResourceKind,
        id: String,
    },

    /// Summary counts across the main collections
    Dashboard,

    /// Show or change saved UI preferences
    Prefs {
        #[arg(long)]
        theme: Option<Theme>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        toggle_sidebar: bool,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Expected key=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    init_logging(&logging_config).context("Failed to initialize logging")?;

    info!("Starting Taxdesk CLI v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Config {
        show,
        init,
        validate,
    } = cli.command
    {
        return handle_config(cli.config.as_ref(), show, init, validate);
    }

    let config = load_config(cli.config.as_ref())?;
    config.validate()?;

    let session = CliSession::open(&config)
        .await
        .context("Failed to open the local session state")?;
    let result = run(&session, cli.command).await;

    if let Err(e) = session.save_cookies().await {
        log_operation_error!("save_cookies", e);
    }

    result
}

async fn run(session: &CliSession, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login { email, password } => handle_login(session, &email, &password).await?,
        Commands::Verify { code } => handle_verify(session, &code).await?,
        Commands::Logout => handle_logout(session).await?,
        Commands::Whoami { cached } => handle_whoami(session, cached).await?,
        Commands::List {
            resource,
            page,
            page_size,
            search,
            ordering,
            filters,
        } => {
            let mut params = ListParams::new()
                .page_size(page_size.unwrap_or_else(|| session.ui.select(|ui| ui.page_size)));
            params.page = page;
            params.search = search;
            params.ordering = ordering;
            params.filters = filters;
            handle_list(session, resource, params).await?
        }
        Commands::Get { resource, id } => handle_get(session, resource, &id).await?,
        Commands::Dashboard => handle_dashboard(session).await?,
        Commands::Prefs {
            theme,
            language,
            page_size,
            toggle_sidebar,
        } => handle_prefs(session, theme, language, page_size, toggle_sidebar).await?,
        // Handled in main before the session is opened
        Commands::Config { .. } => {}
    }
    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> TaxdeskResult<ClientConfig> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            ClientConfig::from_file(path)?
        }
        None => match ClientConfig::default_locations()
            .into_iter()
            .find(|path| path.exists())
        {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                ClientConfig::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                ClientConfig::default()
            }
        },
    };

    config.apply_env_overrides();
    Ok(config)
}

async fn handle_login(session: &CliSession, email: &str, password: &str) -> TaxdeskResult<()> {
    log_operation_start!("login", email = %email);
    let api = AuthApi::new(session.client.clone(), session.auth.clone());

    match api.login(email, password).await {
        Ok(LoginOutcome::Authenticated(user)) => {
            log_operation_success!("login", user_id = %user.id);
            println!("✅ Signed in as {} <{}> ({})", user.full_name(), user.email, user.role);
        }
        Ok(LoginOutcome::TwoFactorRequired(pending)) => {
            log_operation_success!("login", two_factor = true);
            println!(
                "🔐 A {} verification code is required. Run `taxdesk verify <code>`.",
                pending.method
            );
        }
        Err(e) => {
            log_operation_error!("login", e);
            return Err(e);
        }
    }
    Ok(())
}

async fn handle_verify(session: &CliSession, code: &str) -> TaxdeskResult<()> {
    log_operation_start!("verify_two_factor");
    let api = AuthApi::new(session.client.clone(), session.auth.clone());

    let user = api.verify_two_factor(code).await.inspect_err(|e| {
        log_operation_error!("verify_two_factor", e);
    })?;
    log_operation_success!("verify_two_factor", user_id = %user.id);
    println!("✅ Signed in as {} <{}>", user.full_name(), user.email);
    Ok(())
}

async fn handle_logout(session: &CliSession) -> TaxdeskResult<()> {
    let api = AuthApi::new(session.client.clone(), session.auth.clone());
    if let Err(e) = api.logout().await {
        // The local session is gone either way
        log_operation_error!("logout", e);
    }
    Ok(())
}

async fn handle_whoami(session: &CliSession, cached: bool) -> TaxdeskResult<()> {
    let user = if cached {
        session.auth.current_user()
    } else {
        let api = AuthApi::new(session.client.clone(), session.auth.clone());
        Some(api.current_user().await?)
    };

    match user {
        Some(user) => {
            println!("👤 {} <{}>", user.full_name(), user.email);
            println!("   Role: {}", user.role);
            println!(
                "   Two-factor: {}",
                if user.two_factor_enabled { "enabled" } else { "disabled" }
            );
            if !user.permissions.is_empty() {
                println!("   Permissions: {}", user.permissions.join(", "));
            }
            println!("   API: {}", session.config.api.base_url);
        }
        None => {
            let pending = session.auth.select(|state| state.pending_two_factor.clone());
            match pending {
                Some(pending) if !pending.is_expired() => println!(
                    "🔐 Waiting for a {} verification code for {}",
                    pending.method, pending.email
                ),
                _ => println!("Not signed in"),
            }
        }
    }
    Ok(())
}

async fn handle_list(
    session: &CliSession,
    resource: ResourceKind,
    params: ListParams,
) -> TaxdeskResult<()> {
    log_operation_start!("list", resource = %resource);
    let client: ResourceClient<serde_json::Value> =
        ResourceClient::new(session.client.clone(), resource);

    let page = client.list(&params).await?;
    log_operation_success!("list", resource = %resource, count = page.results.len());

    println!("{}", serde_json::to_string_pretty(&page.results)?);
    println!(
        "📄 {} of {} {}{}",
        page.results.len(),
        page.count,
        resource,
        if page.has_next() { " (more pages)" } else { "" }
    );
    Ok(())
}

async fn handle_get(session: &CliSession, resource: ResourceKind, id: &str) -> TaxdeskResult<()> {
    let client: ResourceClient<serde_json::Value> =
        ResourceClient::new(session.client.clone(), resource);
    let record = client.get(id).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Fetches every summary concurrently; an expired session is refreshed once
/// for all of them.
async fn handle_dashboard(session: &CliSession) -> TaxdeskResult<()> {
    log_operation_start!("dashboard");
    let kinds = [
        ResourceKind::Contacts,
        ResourceKind::Cases,
        ResourceKind::Corporations,
        ResourceKind::Appointments,
        ResourceKind::Documents,
    ];

    let summaries = kinds.into_iter().map(|kind| {
        let client: ResourceClient<serde_json::Value> =
            ResourceClient::new(session.client.clone(), kind);
        async move { (kind, client.list(&ListParams::new().page_size(1)).await) }
    });
    let notifications = NotificationsApi::new(session.client.clone());

    let (counts, unread) = tokio::join!(join_all(summaries), notifications.unread_count());

    println!("📊 Dashboard");
    let mut first_error = None;
    for (kind, result) in counts {
        match result {
            Ok(page) => println!("   {:<14} {}", kind.name(), page.count),
            Err(e) => {
                println!("   {:<14} unavailable ({})", kind.name(), e);
                first_error.get_or_insert(e);
            }
        }
    }
    match unread {
        Ok(count) => println!("   {:<14} {}", "unread", count),
        Err(e) => {
            println!("   {:<14} unavailable ({})", "unread", e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        // A session-ending failure means nothing on screen can be trusted
        Some(e) if e.is_session_ending() => Err(e),
        _ => {
            log_operation_success!("dashboard");
            Ok(())
        }
    }
}

async fn handle_prefs(
    session: &CliSession,
    theme: Option<Theme>,
    language: Option<String>,
    page_size: Option<u32>,
    toggle_sidebar: bool,
) -> TaxdeskResult<()> {
    if theme.is_some() || language.is_some() || page_size.is_some() {
        session
            .ui
            .set(|ui| {
                if let Some(theme) = theme {
                    ui.theme = theme;
                }
                if let Some(language) = language {
                    ui.language = language;
                }
                if let Some(page_size) = page_size.filter(|size| *size > 0) {
                    ui.page_size = page_size;
                }
            })
            .await?;
    }
    if toggle_sidebar {
        session.ui.toggle_sidebar().await?;
    }

    let ui = session.ui.get();
    println!("🎨 Preferences");
    println!("   theme:     {}", ui.theme);
    println!("   language:  {}", ui.language);
    println!("   page size: {}", ui.page_size);
    println!(
        "   sidebar:   {}",
        if ui.sidebar_collapsed { "collapsed" } else { "expanded" }
    );
    Ok(())
}

fn handle_config(
    config_path: Option<&PathBuf>,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let path = config_path
            .cloned()
            .or_else(|| ClientConfig::default_locations().into_iter().next())
            .context("No configuration directory available; pass --config")?;
        ClientConfig::default().save_to_file(&path)?;
        println!("✅ Configuration initialized at: {:?}", path);
    }

    if show {
        let config = load_config(config_path)?;
        println!("📋 Current configuration:");
        println!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to render configuration")?
        );
    }

    if validate {
        let config = load_config(config_path)?;
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
