use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trust_core::clock::{Clock, SystemClock};
use trust_core::config::{encryption_key_from_env, TrustConfig};
use trust_core::login::{Credentials, LoginOutcome};
use trust_core::paths::{config_path, cookie_jar_path, data_dir, session_store_path, users_path};
use trust_core::preferences::{
    cookie_consent, load_preferences, save_preferences, set_cookie_consent, Theme,
};
use trust_core::session::GuardOutcome;
use trust_core::storage::{FileCookieJar, FileStore};
use trust_core::throttle::{CooldownTicker, ThrottlePhase};
use trust_core::TrustLayer;

mod directory;

use crate::directory::{hash_password, LocalDirectory};

/// Non-interactive password source for scripted logins.
const PASSWORD_ENV: &str = "TRUST_LOGIN_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about = "Client-side trust layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in against the local user directory
    Login {
        #[arg(long)]
        email: String,
        /// Sit out a cooldown and retry instead of exiting
        #[arg(long)]
        wait: bool,
    },
    /// Enter a protected view (mints the session token when absent)
    Visit,
    /// Show the signed-in account
    Whoami,
    /// Drop the session token and user session
    Logout,
    /// Throttle, key and consent state
    Status,
    /// Dump the security audit trail
    Events,
    /// Record or show cookie consent
    Consent {
        #[arg(value_enum, default_value_t = ConsentAction::Show)]
        action: ConsentAction,
    },
    /// Show or update user preferences
    Prefs {
        #[arg(long, value_enum)]
        theme: Option<ThemeArg>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        analytics: Option<bool>,
        #[arg(long)]
        remember_email: Option<bool>,
    },
    /// End the browsing session: forget every session-scoped key
    EndSession,
    /// Print an Argon2 PHC hash for a users.json entry
    HashPassword,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConsentAction {
    Accept,
    Decline,
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ThemeArg {
    Light,
    Dark,
    System,
}

impl From<ThemeArg> for Theme {
    fn from(arg: ThemeArg) -> Self {
        match arg {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::System => Theme::System,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();
    if let Commands::HashPassword = cli.command {
        return hash_password_command();
    }
    let layer = open_layer()?;
    match cli.command {
        Commands::Login { email, wait } => login_command(&layer, email, wait).await,
        Commands::Visit => visit_command(&layer),
        Commands::Whoami => whoami_command(&layer),
        Commands::Logout => {
            layer.sessions.invalidate();
            println!("signed out");
            Ok(())
        }
        Commands::Status => status_command(&layer),
        Commands::Events => events_command(&layer),
        Commands::Consent { action } => consent_command(&layer, action),
        Commands::Prefs {
            theme,
            language,
            analytics,
            remember_email,
        } => prefs_command(&layer, theme, language, analytics, remember_email),
        Commands::EndSession => {
            layer.end_session()?;
            println!("session ended");
            Ok(())
        }
        Commands::HashPassword => hash_password_command(),
    }
}

fn open_layer() -> Result<TrustLayer> {
    let data = data_dir()?;
    std::fs::create_dir_all(&data)
        .with_context(|| format!("create data dir {}", data.display()))?;
    let config = TrustConfig::load(config_path()?)?;
    let jar = Arc::new(FileCookieJar::new(cookie_jar_path()?));
    let session = Arc::new(FileStore::new(session_store_path()?));
    let injected = encryption_key_from_env();
    let layer = TrustLayer::new(
        &config,
        injected.as_deref(),
        jar,
        session,
        Arc::new(SystemClock),
    )?;
    info!(data_dir = %data.display(), key_source = ?layer.codec.key().source(), "trust layer ready");
    Ok(layer)
}

async fn login_command(layer: &TrustLayer, email: String, wait: bool) -> Result<()> {
    let password = prompt_password("Password: ")?;
    let credentials = Credentials::new(email, password);
    let flow = layer.login_flow(Arc::new(LocalDirectory::new(users_path()?)));

    loop {
        match flow.submit(&credentials).await {
            LoginOutcome::Proceed(record) => {
                println!("signed in as {} ({})", record.email, record.uid);
                return Ok(());
            }
            LoginOutcome::PendingApproval { uid } => {
                println!("account {uid} is awaiting approval");
                return Ok(());
            }
            LoginOutcome::Throttled {
                message,
                retry_after_secs,
            } => {
                println!("{message}");
                if !wait {
                    return Err(anyhow!("login throttled"));
                }
                match layer.throttle.state().phase() {
                    ThrottlePhase::Cooling { .. } => sit_out_cooldown(layer).await,
                    ThrottlePhase::Open => {
                        tokio::time::sleep(std::time::Duration::from_secs(retry_after_secs))
                            .await
                    }
                }
            }
            LoginOutcome::Rejected { message } | LoginOutcome::Invalid { message } => {
                return Err(anyhow!(message));
            }
        }
    }
}

async fn sit_out_cooldown(layer: &TrustLayer) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let clock: Arc<dyn Clock> = layer.clock.clone();
    let _ticker = CooldownTicker::spawn(layer.throttle.clone(), clock, tx);
    while let Some(remaining) = rx.recv().await {
        print!("\rretry in {remaining:>3}s");
        let _ = std::io::stdout().flush();
        if remaining == 0 {
            break;
        }
    }
    println!();
}

fn visit_command(layer: &TrustLayer) -> Result<()> {
    match layer.sessions.enter_protected_view() {
        GuardOutcome::Proceed { token } => {
            println!("session token ok ({}...)", &token[..8.min(token.len())]);
            Ok(())
        }
        GuardOutcome::RedirectToLogin => Err(anyhow!("session invalid; sign in again")),
    }
}

fn whoami_command(layer: &TrustLayer) -> Result<()> {
    if !layer.sessions.require_authenticated().is_proceed() {
        return Err(anyhow!("not signed in"));
    }
    let record = layer
        .sessions
        .current_session()
        .ok_or_else(|| anyhow!("not signed in"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn status_command(layer: &TrustLayer) -> Result<()> {
    let now = layer.clock.now();
    let state = layer.throttle.state();
    println!("key source:      {:?}", layer.codec.key().source());
    println!("failed attempts: {}", state.attempts);
    match state.phase() {
        ThrottlePhase::Open => println!("throttle:        open"),
        ThrottlePhase::Cooling { until } => println!(
            "throttle:        cooling until {} ({}s left)",
            until.to_rfc3339(),
            layer.throttle.time_remaining(now)
        ),
    }
    let consent = match cookie_consent(&layer.store) {
        Some(true) => "accepted",
        Some(false) => "declined",
        None => "unanswered",
    };
    println!("cookie consent:  {consent}");
    let signed_in = layer
        .sessions
        .current_session()
        .map(|r| r.email)
        .unwrap_or_else(|| "-".into());
    println!("signed in:       {signed_in}");
    println!("audit events:    {}", layer.events.len());
    Ok(())
}

fn events_command(layer: &TrustLayer) -> Result<()> {
    for event in layer.events.events() {
        println!(
            "{} {:<8} {:<26} {}",
            event.timestamp.to_rfc3339(),
            format!("{:?}", event.severity),
            event.event_type.as_str(),
            event.details
        );
    }
    Ok(())
}

fn consent_command(layer: &TrustLayer, action: ConsentAction) -> Result<()> {
    match action {
        ConsentAction::Accept => set_cookie_consent(&layer.store, true)?,
        ConsentAction::Decline => set_cookie_consent(&layer.store, false)?,
        ConsentAction::Show => {}
    }
    match cookie_consent(&layer.store) {
        Some(accepted) => println!("cookie consent: {accepted}"),
        None => println!("cookie consent: not given"),
    }
    Ok(())
}

fn prefs_command(
    layer: &TrustLayer,
    theme: Option<ThemeArg>,
    language: Option<String>,
    analytics: Option<bool>,
    remember_email: Option<bool>,
) -> Result<()> {
    let mut prefs = load_preferences(&layer.store);
    let changed =
        theme.is_some() || language.is_some() || analytics.is_some() || remember_email.is_some();
    if let Some(theme) = theme {
        prefs.theme = theme.into();
    }
    if let Some(language) = language {
        prefs.language = language;
    }
    if let Some(analytics) = analytics {
        prefs.analytics = analytics;
    }
    if let Some(remember_email) = remember_email {
        prefs.remember_email = remember_email;
    }
    if changed {
        save_preferences(&layer.store, &prefs)?;
    }
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    Ok(())
}

fn hash_password_command() -> Result<()> {
    let first = prompt_password("New password: ")?;
    if std::env::var(PASSWORD_ENV).is_err() {
        let second = rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?;
        if first != second {
            return Err(anyhow!("passwords do not match"));
        }
    }
    println!("{}", hash_password(&first)?);
    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))
}
