//! Command-line front end for db2secrets.
//!
//! Parses arguments, assembles a [`Backend`] from the chosen storage and
//! driver, and runs one subcommand against it. The binary in `main.rs`
//! only adds logging, signal handling and the exit code.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use db2secrets_core::executor::{DatabaseExecutor, SUPPORTED_DRIVERS, SimulatedDatabase};
use db2secrets_core::logging::LogFormat;
use db2secrets_core::storage::Storage;
use db2secrets_core::{
    Backend, BackendOptions, CancellationToken, ConfigWriteRequest, create_executor, open_storage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// CLI argument structure
#[derive(Parser)]
#[command(name = "db2secrets")]
#[command(about = "DB2 connection configuration and password rotation")]
#[command(version)]
#[command(long_about = "
db2secrets - DB2 credential configuration and password rotation

Stores one DB2 connection configuration and rotates account passwords
through the DB2 NEWPWD handshake. Every rotation is verified by checking
that the old password no longer authenticates.

SECURITY FEATURES:
- Passwords are never logged or echoed
- Connection strings are redacted in all output
- Optional AES-GCM sealing of the stored configuration

EXAMPLES:
  db2secrets config write --connection-string 'HOST=db;PORT=50000;DATABASE=x' --username db2admin --prompt-password
  db2secrets config read
  db2secrets rotate --username svc
  db2secrets rotate-root
  db2secrets --driver simulated --seed-account svc=old1 rotate --username svc

DRIVERS:
  db2        IBM Data Server Driver via ODBC (build with --features db2)
  simulated  In-process account model for rehearsals; accounts last one run
")]
pub struct Cli {
    /// Logging and output options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Storage URL
    #[arg(
        long,
        env = "DB2SECRETS_STORAGE",
        default_value = "sqlite://db2secrets.db",
        help = "Storage URL (memory: or sqlite://path)"
    )]
    pub storage: String,

    /// Database driver
    #[arg(
        long,
        env = "DB2SECRETS_DRIVER",
        default_value = "db2",
        help = "Database driver (see the drivers subcommand)"
    )]
    pub driver: String,

    /// ODBC driver name used by the db2 driver
    #[cfg(feature = "db2")]
    #[arg(
        long,
        env = "DB2SECRETS_ODBC_DRIVER",
        default_value = db2secrets_core::executor::db2::DEFAULT_ODBC_DRIVER,
        help = "ODBC driver name registered for the IBM Data Server Driver"
    )]
    pub odbc_driver: String,

    /// Timeout applied to every connection attempt and statement
    #[arg(long, default_value = "30", value_name = "SECONDS")]
    pub timeout: u64,

    /// Accounts preloaded into the simulated driver
    #[arg(
        long = "seed-account",
        value_name = "USER=PASSWORD",
        help = "Account for the simulated driver (repeatable, rehearsal only)"
    )]
    pub seed_accounts: Vec<String>,

    /// Passphrase sealing the stored configuration
    #[cfg(feature = "encryption")]
    #[arg(
        long,
        env = "DB2SECRETS_SEAL_PASSPHRASE",
        hide_env_values = true,
        help = "Seal the stored configuration with this passphrase"
    )]
    pub seal_passphrase: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Global output options
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "text", value_parser = parse_log_format)]
    pub log_format: LogFormat,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the connection configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Rotate an account password and verify the old one is rejected
    Rotate(RotateArgs),
    /// Rotate the configured bind account and store the new password
    RotateRoot,
    /// List supported database drivers
    Drivers,
}

/// Configuration subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write (replace) the connection configuration
    Write(ConfigWriteArgs),
    /// Show the configuration without the bind password
    Read,
    /// Exit successfully only if a configuration exists
    Exists,
}

/// Arguments of `config write`
#[derive(Args)]
pub struct ConfigWriteArgs {
    /// Base keyword connection string
    #[arg(long, help = "DB2 connection string without UID/PWD")]
    pub connection_string: String,

    /// Bind account
    #[arg(long, help = "Bind account used by the backend")]
    pub username: Option<String>,

    /// Read the bind password from the environment
    #[arg(
        long,
        env = "DB2SECRETS_BIND_PASSWORD",
        hide_env_values = true,
        help = "Bind password (prefer the environment variable or --prompt-password)"
    )]
    pub password: Option<String>,

    /// Prompt for the bind password
    #[arg(long, conflicts_with = "password")]
    pub prompt_password: bool,

    /// Named password policy
    #[arg(long, conflicts_with = "length")]
    pub password_policy: Option<String>,

    /// Generated password length
    #[arg(long)]
    pub length: Option<u32>,

    /// Default password TTL
    #[arg(long, value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// Maximum password TTL
    #[arg(long, value_name = "SECONDS")]
    pub max_ttl: Option<u64>,
}

/// Arguments of `rotate`
#[derive(Args)]
pub struct RotateArgs {
    /// Account to rotate
    #[arg(long)]
    pub username: String,

    /// Current password; prompted for when absent
    #[arg(long, env = "DB2SECRETS_OLD_PASSWORD", hide_env_values = true)]
    pub old_password: Option<String>,

    /// Replacement password; prompted for when absent
    #[arg(long, env = "DB2SECRETS_NEW_PASSWORD", hide_env_values = true)]
    pub new_password: Option<String>,
}

fn masked(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| "****")
}

impl std::fmt::Debug for Cli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Cli");
        debug
            .field("global", &self.global)
            .field("storage", &self.storage)
            .field("driver", &self.driver);
        #[cfg(feature = "db2")]
        debug.field("odbc_driver", &self.odbc_driver);
        debug.field(
            "seed_accounts",
            &self
                .seed_accounts
                .iter()
                .map(|seed| seed.split_once('=').map_or("****", |(user, _)| user))
                .collect::<Vec<_>>(),
        );
        #[cfg(feature = "encryption")]
        debug.field("seal_passphrase", &masked(self.seal_passphrase.as_ref()));
        debug
            .field("timeout", &self.timeout)
            .field("command", &self.command)
            .finish()
    }
}

impl std::fmt::Debug for ConfigWriteArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWriteArgs")
            .field("connection_string", &self.connection_string)
            .field("username", &self.username)
            .field("password", &masked(self.password.as_ref()))
            .field("prompt_password", &self.prompt_password)
            .field("password_policy", &self.password_policy)
            .field("length", &self.length)
            .field("ttl", &self.ttl)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl std::fmt::Debug for RotateArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotateArgs")
            .field("username", &self.username)
            .field("old_password", &masked(self.old_password.as_ref()))
            .field("new_password", &masked(self.new_password.as_ref()))
            .finish()
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse().map_err(|e: db2secrets_core::SecretsError| e.to_string())
}

/// Builds the executor for the selected driver.
///
/// The simulated driver is seeded with `--seed-account` entries.
///
/// # Errors
/// Returns error for unknown drivers, drivers not compiled into this build,
/// or malformed seed entries
pub async fn build_executor(cli: &Cli) -> anyhow::Result<Arc<dyn DatabaseExecutor>> {
    if !cli.driver.eq_ignore_ascii_case("simulated") {
        if !cli.seed_accounts.is_empty() {
            bail!("--seed-account is only valid with the simulated driver");
        }
        #[cfg(feature = "db2")]
        if cli.driver.eq_ignore_ascii_case("db2") {
            debug!(odbc_driver = %cli.odbc_driver, "Using the DB2 ODBC driver");
            return Ok(Arc::new(db2secrets_core::executor::Db2Executor::with_driver(
                cli.odbc_driver.clone(),
            )));
        }
        return Ok(create_executor(&cli.driver)?);
    }

    let db = SimulatedDatabase::new();
    for seed in &cli.seed_accounts {
        let seed = Zeroizing::new(seed.clone());
        let Some((user, password)) = seed.split_once('=') else {
            bail!("--seed-account expects USER=PASSWORD");
        };
        db.create_account(user, password).await;
    }
    debug!(accounts = cli.seed_accounts.len(), "Simulated driver ready");
    Ok(Arc::new(db))
}

/// Opens the storage backend, sealing it when a passphrase is configured.
///
/// # Errors
/// Returns error if the storage URL is unsupported or cannot be opened
pub async fn build_storage(cli: &Cli) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = open_storage(&cli.storage)
        .await
        .with_context(|| format!("opening storage '{}'", cli.storage))?;

    #[cfg(feature = "encryption")]
    if let Some(passphrase) = &cli.seal_passphrase {
        debug!("Sealing stored configuration");
        return Ok(Arc::new(db2secrets_core::storage::SealedStorage::new(
            storage,
            Zeroizing::new(passphrase.clone()),
        )));
    }

    Ok(storage)
}

/// Assembles the backend described by the CLI arguments.
///
/// # Errors
/// Returns error if storage, driver or options are invalid
pub async fn build_backend(cli: &Cli) -> anyhow::Result<Backend> {
    if cli.timeout == 0 {
        bail!("--timeout must be greater than 0");
    }
    let options = BackendOptions::default().with_timeout(Duration::from_secs(cli.timeout));
    let storage = build_storage(cli).await?;
    let executor = build_executor(cli).await?;
    Ok(Backend::new(storage, executor, options)?)
}

/// Runs the parsed command.
///
/// # Errors
/// Returns the first failure with context; core error kinds stay available
/// through `downcast_ref::<SecretsError>()`.
pub async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    if let Command::Drivers = cli.command {
        list_drivers();
        return Ok(());
    }

    let backend = build_backend(&cli).await?;

    match cli.command {
        Command::Config(ConfigCommand::Write(args)) => write_config(&backend, args).await,
        Command::Config(ConfigCommand::Read) => read_config(&backend).await,
        Command::Config(ConfigCommand::Exists) => {
            if backend.config_exists().await? {
                println!("Configuration exists");
                Ok(())
            } else {
                bail!("no configuration has been written")
            }
        }
        Command::Rotate(args) => rotate(&backend, args, &cancel).await,
        Command::RotateRoot => {
            let rotated_at = backend
                .rotate_root(&cancel)
                .await
                .context("root credential rotation failed")?;
            println!("Root credential rotated at {}", rotated_at.to_rfc3339());
            Ok(())
        }
        Command::Drivers => Ok(()),
    }
}

async fn write_config(backend: &Backend, args: ConfigWriteArgs) -> anyhow::Result<()> {
    let password = if args.prompt_password {
        Some(prompt_password("Bind password: ")?)
    } else {
        args.password.map(Zeroizing::new)
    };

    let request = ConfigWriteRequest {
        connection_string: args.connection_string,
        username: args.username,
        password,
        password_policy: args.password_policy,
        length: args.length,
        ttl: args.ttl.map(Duration::from_secs),
        max_ttl: args.max_ttl.map(Duration::from_secs),
    };

    backend
        .write_config(request)
        .await
        .context("writing configuration failed")?;
    info!("Configuration stored");
    println!("Configuration written");
    Ok(())
}

async fn read_config(backend: &Backend) -> anyhow::Result<()> {
    let Some(view) = backend.read_config().await? else {
        bail!("no configuration has been written");
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn rotate(
    backend: &Backend,
    args: RotateArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let old_password = match args.old_password {
        Some(password) => Zeroizing::new(password),
        None => prompt_password("Current password: ")?,
    };
    let new_password = match args.new_password {
        Some(password) => Zeroizing::new(password),
        None => {
            let first = prompt_password("New password: ")?;
            let confirm = prompt_password("Confirm new password: ")?;
            if first != confirm {
                bail!("new passwords do not match");
            }
            first
        }
    };

    backend
        .rotate_credential(&args.username, &old_password, &new_password, cancel)
        .await
        .with_context(|| format!("rotating password for '{}' failed", args.username))?;
    println!("Password for '{}' rotated and verified", args.username);
    Ok(())
}

fn prompt_password(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn list_drivers() {
    println!("Supported drivers:");
    for (name, description) in SUPPORTED_DRIVERS {
        println!("  {:<10} {}", name, description);
    }
}
