use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llink_api::Deployment;
use llink_client::RemoteDatabaseHandle;
use llink_core::{
    config::DEFAULT_PORT, AtRestEncryptionManager, DatabaseHandle, DeploymentMode, NetworkConfig,
    Paths, QueryMethod, QueryOutput,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod table;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Table format (default)
    Table,
    /// Pretty JSON, in the wire response shape
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// Owns the database and serves LAN clients
    Server,
    /// Forwards every statement to a server
    Client,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    All,
    Get,
    Run,
}

impl From<MethodArg> for QueryMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::All => QueryMethod::All,
            MethodArg::Get => QueryMethod::Get,
            MethodArg::Run => QueryMethod::Run,
        }
    }
}

#[derive(Parser)]
#[command(name = "llink")]
#[command(about = "LedgerLink database proxy", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the network configuration
    Init {
        #[arg(long, value_enum)]
        mode: ModeArg,
        /// Server address (client mode)
        #[arg(long)]
        address: Option<String>,
        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// API key printed by the server's `init` (client mode)
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Run server mode until Ctrl-C
    Serve,
    /// Check that the configured server is reachable and accepts our key
    Ping,
    /// Run one statement through the configured handle
    Query {
        /// SQL statement
        sql: String,
        /// Positional parameters as a JSON array
        #[arg(long)]
        params: Option<String>,
        #[arg(short, long, value_enum, default_value = "all")]
        method: MethodArg,
        /// Output format (table, json)
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Encrypt the database now, as on shutdown
    Encrypt,
    /// Decrypt the database now, as on startup
    Decrypt,
    /// Show configuration and which database files exist
    Status,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ledgerlink")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Default to info level, override with RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let paths = Paths::new(cli.data_dir.unwrap_or_else(default_data_dir));

    match cli.command {
        Commands::Init {
            mode,
            address,
            port,
            api_key,
        } => {
            let path = paths.network_config();
            match mode {
                ModeArg::Server => {
                    let mut config = NetworkConfig::load_or_default(&path)
                        .context("Failed to read network config")?;
                    config.mode = DeploymentMode::Server;
                    config.port = port;
                    config.validate()?;
                    config.save(&path).context("Failed to write network config")?;
                    let key = config.ensure_api_key(&path)?;
                    println!("Server mode configured on port {}", port);
                    println!("API key (enter this on each client): {}", key);
                }
                ModeArg::Client => {
                    let Some(address) = address else {
                        bail!("--address is required in client mode");
                    };
                    let Some(api_key) = api_key else {
                        bail!("--api-key is required in client mode");
                    };
                    let config = NetworkConfig::client(address, port, api_key);
                    config.validate()?;
                    config.save(&path).context("Failed to write network config")?;
                    println!("Client mode configured for {}", config.base_url());
                }
            }
        }

        Commands::Serve => {
            let config = load_config(&paths)?;
            if config.mode != DeploymentMode::Server {
                bail!("serve needs server mode; run `llink init --mode server` first");
            }

            let deployment = Deployment::start(&paths, config)
                .await
                .context("Failed to start server")?;
            if let Some(addr) = deployment.proxy_addr() {
                println!("Serving {} on {}", paths.database().display(), addr);
            }

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");

            if let Some(outcome) = deployment.shutdown().await? {
                println!("Shutdown: {:?}", outcome);
            }
        }

        Commands::Ping => {
            let config = load_config(&paths)?;
            let remote = remote_for(&config)?;
            remote
                .ping()
                .await
                .with_context(|| format!("{} is not reachable", remote.base_url()))?;
            println!("Server reachable at {}", remote.base_url());
            remote.check_credentials().await.context("Server rejected the API key")?;
            println!("API key accepted");
        }

        Commands::Query {
            sql,
            params,
            method,
            output,
        } => {
            let params = match params {
                Some(text) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&text).context("Invalid JSON params")?;
                    match value {
                        serde_json::Value::Array(items) => items,
                        _ => bail!("--params must be a JSON array"),
                    }
                }
                None => Vec::new(),
            };

            let config = load_config(&paths)?;
            let result = match config.mode {
                // The running server owns the file; go through its proxy
                DeploymentMode::Server | DeploymentMode::Client => {
                    let remote = remote_for(&config)?;
                    remote.run_method(method.into(), &sql, params).await
                }
                DeploymentMode::Unset => {
                    let deployment = Deployment::start(&paths, config).await?;
                    let result = deployment.handle().run_method(method.into(), &sql, params).await;
                    deployment.shutdown().await?;
                    result
                }
            };

            print_output(&result.context("Query failed")?, output)?;
        }

        Commands::Encrypt => {
            let manager = AtRestEncryptionManager::from_paths(&paths);
            println!("{:?}", manager.shutdown());
        }

        Commands::Decrypt => {
            let manager = AtRestEncryptionManager::from_paths(&paths);
            println!("{:?}", manager.startup());
        }

        Commands::Status => {
            let config = load_config(&paths)?;
            let exists = |p: PathBuf| String::from(if p.exists() { "present" } else { "absent" });
            let mode = match config.mode {
                DeploymentMode::Server => "server",
                DeploymentMode::Client => "client",
                DeploymentMode::Unset => "unset",
            };
            let pairs = [
                ("Data directory", paths.data_dir.display().to_string()),
                ("Mode", mode.to_string()),
                ("Server", config.base_url()),
                ("API key", exists_flag(config.api_key.is_some())),
                ("Database", exists(paths.database())),
                ("Encrypted database", exists(paths.encrypted_database())),
                ("Key file", exists(paths.key_file())),
                ("Query log", exists(paths.query_log())),
            ];
            println!("{}", table::format_pairs_table(&pairs));
        }
    }

    Ok(())
}

fn exists_flag(present: bool) -> String {
    String::from(if present { "set" } else { "not set" })
}

fn load_config(paths: &Paths) -> Result<NetworkConfig> {
    NetworkConfig::load_or_default(&paths.network_config()).context("Failed to read network config")
}

/// Handle to the configured server; in server mode that is our own proxy on loopback
fn remote_for(config: &NetworkConfig) -> Result<RemoteDatabaseHandle> {
    match config.mode {
        DeploymentMode::Client => Ok(RemoteDatabaseHandle::from_config(config)?),
        DeploymentMode::Server => {
            let key = config
                .api_key
                .as_deref()
                .context("Server has no API key yet; run `llink init --mode server`")?;
            Ok(RemoteDatabaseHandle::new("127.0.0.1", config.port, key)?)
        }
        DeploymentMode::Unset => bail!("No network mode configured; run `llink init`"),
    }
}

fn print_output(output: &QueryOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output.to_json())?),
        OutputFormat::Table => match output {
            QueryOutput::Rows(rows) => println!("{}", table::format_rows_table(rows)),
            QueryOutput::Row(Some(row)) => {
                println!("{}", table::format_rows_table(std::slice::from_ref(row)))
            }
            QueryOutput::Row(None) => println!("No row"),
            QueryOutput::Exec(exec) => println!(
                "lastID: {}, changes: {}",
                exec.last_insert_id, exec.changes
            ),
        },
    }
    Ok(())
}
