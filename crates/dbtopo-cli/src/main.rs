//! dbtopo — commits one topology step against a store file.
//!
//! An orchestrator pipeline calls this binary once per named step after it
//! has finished the out-of-band work for that step. Results are printed as
//! JSON on stdout; logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! dbtopo --config /etc/dbtopo.toml promote-slave --cluster 7 \
//!     --params '{"ejector":{"ip":"10.0.0.1","port":30000},"receiver":{"ip":"10.0.0.2","port":30000}}'
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dbtopo_core::{ClusterId, TopoConfig};
use dbtopo_engine::{EngineError, TopologyEngine};
use dbtopo_store::StateStore;

mod commands;

#[derive(Parser)]
#[command(
    name = "dbtopo",
    about = "Cluster topology and switchover metadata engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./dbtopo.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the store path from the configuration.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Promote the ejector's slave to master.
    PromoteSlave {
        #[arg(long)]
        cluster: ClusterId,
        /// `{"ejector":{"ip","port"},"receiver":{"ip","port"}}`
        #[arg(long)]
        params: String,
    },
    /// Hand the old pair's entries to an already-synced pair.
    PairedSwitch {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long)]
        params: String,
    },
    /// Replace a dead or missing slave.
    RepairSlave {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long)]
        params: String,
    },
    /// Register provisioned machines and instances from a JSON file.
    Provision {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Create a cluster from a JSON request file.
    Create {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Remove a cluster and everything it owns.
    Decommission {
        #[arg(long)]
        cluster: ClusterId,
    },
    /// Attach storages, pairs and proxies from a JSON file.
    Attach {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long)]
        spec: PathBuf,
    },
    /// Detach instances given as a JSON address list.
    Detach {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long)]
        addrs: String,
    },
    /// Set a cluster online or offline.
    Phase {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long, value_parser = ["online", "offline"])]
        set: String,
    },
    /// Print a cluster's topology.
    Show {
        #[arg(long)]
        cluster: ClusterId,
    },
    /// List invariant violations in a cluster.
    Audit {
        #[arg(long)]
        cluster: ClusterId,
    },
    /// Export every table.
    Dump,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TopoConfig> {
    match path {
        Some(path) => TopoConfig::from_file(path),
        None => {
            let local = Path::new("dbtopo.toml");
            if local.exists() {
                TopoConfig::from_file(local)
            } else {
                Ok(TopoConfig::default())
            }
        }
    }
}

fn init_tracing(config: &TopoConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &TopoConfig) -> anyhow::Result<StateStore> {
    if let Some(dir) = config.store.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(&config.store.path)?;
    debug!(path = ?config.store.path, "store opened");
    Ok(store)
}

fn run(cli: Cli, mut config: TopoConfig) -> anyhow::Result<()> {
    if let Some(path) = cli.store {
        config.store.path = path;
    }
    let engine = TopologyEngine::from_config(open_store(&config)?, &config)?;

    match cli.command {
        Command::PromoteSlave { cluster, params } => {
            commands::switch::promote_slave(&engine, cluster, &params)
        }
        Command::PairedSwitch { cluster, params } => {
            commands::switch::paired_switch(&engine, cluster, &params)
        }
        Command::RepairSlave { cluster, params } => {
            commands::switch::repair_slave(&engine, cluster, &params)
        }
        Command::Provision { spec } => commands::store::provision(engine.store(), &spec),
        Command::Create { spec } => commands::cluster::create(&engine, &spec),
        Command::Decommission { cluster } => commands::cluster::decommission(&engine, cluster),
        Command::Attach { cluster, spec } => commands::cluster::attach(&engine, cluster, &spec),
        Command::Detach { cluster, addrs } => commands::cluster::detach(&engine, cluster, &addrs),
        Command::Phase { cluster, set } => commands::cluster::phase(&engine, cluster, &set),
        Command::Show { cluster } => commands::cluster::show(&engine, cluster),
        Command::Audit { cluster } => commands::cluster::audit(&engine, cluster),
        Command::Dump => commands::store::dump(engine.store()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dbtopo: failed to load config: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let report = match err.downcast_ref::<EngineError>() {
                Some(engine_err) => serde_json::json!({
                    "error": engine_err.to_string(),
                    "kind": engine_err.kind(),
                    "retryable": engine_err.is_retryable(),
                }),
                None => serde_json::json!({ "error": format!("{err:#}") }),
            };
            println!("{report}");
            ExitCode::FAILURE
        }
    }
}
