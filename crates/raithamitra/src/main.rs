//! RaithaMitra: passcode sign-in and account recovery tools
//!
//! Main binary with subcommands:
//! - `request-otp`: Send a sign-in passcode to a phone number
//! - `verify-otp`: Verify a passcode and reconcile the signed-in identity
//! - `reconcile`: Reconcile an identity directly (support tooling)
//! - `remap`: Finish repointing records after a partial recovery

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use raithamitra_recovery::{DEFAULT_MAX_REMAP_OPS, RecoveryConfig};
use raithamitra_store::Role;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod commands;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "raithamitra")]
#[command(about = "RaithaMitra sign-in and account recovery", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    recovery: RecoveryArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where profiles and owned records live.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Operate on a JSON snapshot instead of Firestore; written back afterwards
    #[arg(long, global = true, env = "RAITHAMITRA_STORE_FILE")]
    pub store_file: Option<PathBuf>,

    /// Firebase project ID
    #[arg(long, global = true, env = "RAITHAMITRA_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Firestore REST endpoint
    #[arg(long, global = true, env = "RAITHAMITRA_FIRESTORE_URL")]
    pub firestore_url: Option<String>,

    /// OAuth access token for support commands
    #[arg(long, global = true, env = "RAITHAMITRA_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RecoveryArgs {
    /// Most record updates committed by one recovery
    #[arg(long, global = true, env = "RAITHAMITRA_MAX_REMAP_OPS", default_value_t = DEFAULT_MAX_REMAP_OPS)]
    max_remap_ops: usize,

    /// Offer passcode sign-in to customers as well as farmers
    #[arg(long, global = true, env = "RAITHAMITRA_CUSTOMER_PHONE_LOGIN", value_parser = parse_bool_env, default_value = "false")]
    customer_phone_login: bool,
}

impl RecoveryArgs {
    fn config(&self) -> RecoveryConfig {
        RecoveryConfig::default()
            .with_max_remap_ops(self.max_remap_ops)
            .with_customer_phone_login(self.customer_phone_login)
    }
}

/// Identity provider settings for the passcode commands.
#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Web API key of the Firebase project
    #[arg(long, env = "RAITHAMITRA_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Identity Toolkit REST endpoint
    #[arg(long, env = "RAITHAMITRA_IDENTITY_URL")]
    pub identity_url: Option<String>,

    /// App verification token sent with passcode requests
    #[arg(long, env = "RAITHAMITRA_RECAPTCHA_TOKEN", hide_env_values = true)]
    pub recaptcha_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a sign-in passcode to a 10-digit phone number
    RequestOtp {
        #[command(flatten)]
        auth: AuthArgs,

        /// Local phone number, without country code
        phone: String,

        /// Role to sign in as (Farmer or Customer)
        #[arg(long, default_value = "Farmer")]
        role: Role,
    },

    /// Verify a passcode and reconcile the identity it signs in
    VerifyOtp {
        #[command(flatten)]
        auth: AuthArgs,

        /// Session printed by request-otp
        #[arg(long)]
        session: String,

        /// Passcode received by SMS
        #[arg(long)]
        code: String,

        /// Role to sign in as (Farmer or Customer)
        #[arg(long, default_value = "Farmer")]
        role: Role,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile an identity with any orphaned profile sharing its phone and role
    Reconcile {
        /// Identity that just signed in
        #[arg(long)]
        identity: String,

        /// Phone number the identity verified
        #[arg(long)]
        phone: String,

        /// Role the identity signed in as
        #[arg(long, default_value = "Farmer")]
        role: Role,

        /// Preview changes without applying (dry-run)
        #[arg(long)]
        dry_run: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repoint records still owned by the old identity of a recovered profile
    Remap {
        /// Identity the profile was recovered from
        #[arg(long)]
        from: String,

        /// Identity the profile was recovered onto
        #[arg(long)]
        to: String,

        /// Role of the recovered account
        #[arg(long, default_value = "Farmer")]
        role: Role,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "raithamitra=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.recovery.config();

    match cli.command {
        Commands::RequestOtp { auth, phone, role } => {
            commands::request_otp(&cli.store, &auth, config, &phone, role).await
        }

        Commands::VerifyOtp {
            auth,
            session,
            code,
            role,
            json,
        } => commands::verify_otp(&cli.store, &auth, config, &session, &code, role, json).await,

        Commands::Reconcile {
            identity,
            phone,
            role,
            dry_run,
            json,
        } => {
            commands::reconcile(&cli.store, config, &identity, &phone, role, dry_run, json).await
        }

        Commands::Remap {
            from,
            to,
            role,
            json,
        } => commands::remap(&cli.store, config, &from, &to, role, json).await,
    }
}
