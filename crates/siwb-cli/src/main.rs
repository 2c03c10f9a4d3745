/*
[INPUT]:  CLI arguments, YAML configuration file
[OUTPUT]: Address classification, sign-in, stored session management
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, subcommands, or startup flow
*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use siwb_cli::commands;
use siwb_cli::config::{CliConfig, resolve_config_path};

#[derive(Parser, Debug)]
#[command(name = "siwb", version, about = "Sign in with a Bitcoin address")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", global = true)]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,
    /// Validate the configuration and stop before contacting anything
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the format and network of an address
    Classify { address: String },
    /// Show the signature scheme a provider would be asked for
    Scheme {
        #[arg(long)]
        provider: String,
        address: String,
    },
    /// Sign in, signing the challenge with an external wallet
    Login {
        /// Provider key the signature comes from (decides the scheme)
        #[arg(long, default_value = "manual")]
        provider: String,
        /// Address to sign in with, overrides wallet.address
        #[arg(long)]
        address: Option<String>,
    },
    /// Inspect or remove the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Ask the authority for the principal bound to an address
    Whois { address: String },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    Show {
        #[arg(long)]
        json: bool,
    },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    match args.command {
        Commands::Classify { address } => {
            println!("{}", commands::describe_address(&address)?);
        }
        Commands::Scheme { provider, address } => {
            let auth = match resolve_config_path(args.config_path.as_deref()) {
                Some(path) => load_config(&path)?.auth,
                None => Default::default(),
            };
            println!("{}", commands::select_scheme(&auth, &provider, &address)?);
        }
        Commands::Login { provider, address } => {
            let config = required_config(args.config_path.as_deref())?;
            if let Some(address) = &address {
                siwb_auth::classify(address).context("--address")?;
            }
            if args.dry_run {
                info!(%provider, "dry-run requested; configuration validated");
                return Ok(());
            }

            let identity = commands::login(&config, &provider, address).await?;
            println!("{}", style("Signed in").bold().green());
            println!("principal:   {}", style(identity.principal()).cyan());
            if let Some(expires_at) = identity.chain().expires_at() {
                println!("expires at:  {}", expires_at.to_rfc3339());
            }
            println!("stored in:   {}", config.store_dir().display());
        }
        Commands::Session { action } => {
            let config = required_config(args.config_path.as_deref())?;
            if args.dry_run {
                info!("dry-run requested; configuration validated");
                return Ok(());
            }
            let store = commands::credential_store(&config);
            match action {
                SessionAction::Show { json } => match commands::session_show(&store).await? {
                    Some(summary) if json => {
                        println!("{}", serde_json::to_string_pretty(&summary)?)
                    }
                    Some(summary) => println!("{summary}"),
                    None => println!("{}", style("No active session").yellow()),
                },
                SessionAction::Clear => {
                    commands::session_clear(&store).await?;
                    println!("Session cleared");
                }
            }
        }
        Commands::Whois { address } => {
            let config = required_config(args.config_path.as_deref())?;
            if args.dry_run {
                info!("dry-run requested; configuration validated");
                return Ok(());
            }
            let authority = commands::authority_client(&config)?;
            println!("{}", commands::whois(&authority, &address).await?);
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &Path) -> Result<CliConfig> {
    let config = CliConfig::from_file(path).context("load config")?;
    config.validate().context("validate config")?;
    info!(config_path = %path.display(), "configuration loaded");
    Ok(config)
}

fn required_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let path = resolve_config_path(explicit)
        .context("no configuration: pass --config or create <config dir>/siwb/config.yaml")?;
    load_config(&path)
}
