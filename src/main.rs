use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relogin::config::Config;
use relogin::store::{BindingStore, SqliteBindingStore};
use relogin::{rlog, rlog_error, server, Error, ReloginService, Result};

/// Relogin - QR relogin coordinator for panel-managed bridge instances
#[derive(Parser, Debug)]
#[command(name = "relogin")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:
    RELOGIN_LOG=<level>  Log level: error, warn, info, debug, trace
    RELOGIN_DEBUG=1      Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.relogin/relogin.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (default: ~/.relogin/relogin.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the live-connection server
    Serve {
        /// Listen address, overrides the config file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Bind an alias to an instance id
    Bind { alias: String, instance_id: String },

    /// Remove an alias binding
    Unbind { alias: String },

    /// List alias bindings
    Bindings,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    relogin::log::init_with_debug(cli.debug);

    if let Err(e) = run(cli).await {
        rlog_error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Serve { listen } => run_serve(config_path, listen).await,
        Command::Init { force } => run_init(config_path, force),
        Command::Bind { alias, instance_id } => {
            let store = open_store(config_path)?;
            let binding = store.save(&alias, &instance_id).await?;
            println!("Bound {} -> {}", binding.alias, binding.resource_id);
            Ok(())
        }
        Command::Unbind { alias } => {
            let store = open_store(config_path)?;
            if !store.delete(&alias).await? {
                return Err(Error::NotFound(format!("no binding for alias {}", alias)));
            }
            println!("Unbound {}", alias);
            Ok(())
        }
        Command::Bindings => {
            let store = open_store(config_path)?;
            let bindings = store.list().await?;
            if bindings.is_empty() {
                println!("No bindings");
            }
            for b in bindings {
                println!(
                    "{:<20} {:<40} {}",
                    b.alias,
                    b.resource_id,
                    b.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
    }
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load(config_path)?;
    relogin::log::configure(&config.log)?;
    Ok(config)
}

fn open_store(config_path: Option<&Path>) -> Result<SqliteBindingStore> {
    let config = load_config(config_path)?;
    SqliteBindingStore::open(&config.effective_db_path()?)
}

fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::config_path()?,
    };
    if path.exists() && !force {
        return Err(Error::InvalidInput(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    let written = Config::default().save(Some(&path))?;
    println!("Wrote default config to {}", written.display());
    Ok(())
}

async fn run_serve(config_path: Option<&Path>, listen: Option<String>) -> Result<()> {
    relogin::log::set_echo(true);
    let config = load_config(config_path)?;
    let listen = listen.unwrap_or_else(|| config.listen.clone());

    let service = Arc::new(ReloginService::from_config(&config)?);
    let listener = TcpListener::bind(&listen).await?;
    rlog!("relogin starting (panel {})", config.panel.base_url);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::serve(
        listener,
        Arc::clone(&service),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    rlog!("Interrupt received, shutting down");
    service.shutdown();
    shutdown.cancel();

    server
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}
