mod call_cmd;
mod config;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use anyhow::Context;
use clap::{Parser, Subcommand};

use planstore_db::{Store, create_store};

use config::{CliOverrides, PlanstoreConfig};

#[derive(Parser)]
#[command(name = "planstore", about = "Plan and task store exposed as invokable functions")]
struct Cli {
    /// Store URL, memory:// or redis://... (overrides PLANSTORE_STORE_URL env var)
    #[arg(long, global = true)]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a planstore config file
    Init {
        /// Store connection URL to record
        #[arg(long, default_value = "redis://127.0.0.1:6379")]
        url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Serve the function protocol over HTTP and SSE
    Serve {
        /// Address to bind (overrides PLANSTORE_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides PLANSTORE_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the invokable functions
    Functions {
        /// Print the full catalog with parameter schemas as JSON
        #[arg(long)]
        json: bool,
    },
    /// Invoke one function against the configured store
    Call {
        /// Function name (see `planstore functions`)
        name: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Check that the configured store is reachable
    Ping,
}

/// Execute the `planstore init` command: write config file.
fn cmd_init(url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::initial(url);
    let written = config::save_config(&cfg)?;

    println!("Config written to {}", written.display());
    println!("  store.url = {url}");
    println!(
        "  server = {}:{} (heartbeat every {}s)",
        config::DEFAULT_BIND,
        config::DEFAULT_PORT,
        config::DEFAULT_HEARTBEAT_SECS
    );
    println!();
    println!("Next: run `planstore ping` to check the store, then `planstore serve`.");

    Ok(())
}

/// Open the store named by the resolved config.
async fn open_store(resolved: &PlanstoreConfig) -> anyhow::Result<Store> {
    create_store(&resolved.store)
        .await
        .with_context(|| format!("failed to open store {}", resolved.store.redacted_url()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut overrides = CliOverrides {
        store_url: cli.store_url.clone(),
        ..CliOverrides::default()
    };

    match cli.command {
        Commands::Init { url, force } => {
            cmd_init(&url, force)?;
        }
        Commands::Functions { json } => {
            call_cmd::run_functions(json)?;
        }
        Commands::Serve { bind, port } => {
            overrides.bind = bind;
            overrides.port = port;
            let resolved = PlanstoreConfig::resolve(&overrides)?;
            let store = open_store(&resolved).await?;
            serve_cmd::run_serve(store, &resolved.listen_addr(), resolved.heartbeat).await?;
        }
        Commands::Call { name, params } => {
            let params = call_cmd::parse_params(params.as_deref())?;
            let resolved = PlanstoreConfig::resolve(&overrides)?;
            let store = open_store(&resolved).await?;
            let result = call_cmd::run_call(store, &name, params).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to render result")?
            );
        }
        Commands::Ping => {
            let resolved = PlanstoreConfig::resolve(&overrides)?;
            let store = open_store(&resolved).await?;
            call_cmd::run_ping(&store).await?;
        }
    }

    Ok(())
}
