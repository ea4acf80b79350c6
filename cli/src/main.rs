//! KubeTunnel CLI - Supervised kubectl port-forward tunnels
//!
//! A command-line tool for forwarding Kubernetes Service ports to the local
//! machine, browsing kubeconfig contexts, and freeing occupied local ports.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kubetunnel_core::{ConfigStore, KubernetesDiscovery, PortForwardManager, SystemPortResolver};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kubetunnel")]
#[command(author, version, about = "Supervised kubectl port-forward tunnels")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ~/.kubetunnel/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward a Service port to a local port until interrupted
    #[command(alias = "fwd")]
    Forward {
        /// Kubeconfig context
        #[arg(short, long)]
        context: String,

        /// Namespace of the Service
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Service name
        service: String,

        /// Service port to forward
        service_port: u16,

        /// Local port (defaults to the service port)
        #[arg(short, long)]
        local_port: Option<u16>,

        /// Kill whatever process holds the local port instead of aborting
        #[arg(long)]
        kill_conflicting: bool,
    },

    /// List kubeconfig contexts
    Contexts,

    /// List namespaces of a context
    Namespaces {
        /// Kubeconfig context (defaults to the current one)
        #[arg(short, long)]
        context: Option<String>,
    },

    /// List services of a namespace
    #[command(alias = "svc")]
    Services {
        /// Kubeconfig context (defaults to the current one)
        #[arg(short, long)]
        context: Option<String>,

        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Show which process owns a local TCP port
    PortOwner { port: u16 },

    /// Forcibly kill a process by PID
    Kill {
        pid: u32,

        /// Confirm the kill
        #[arg(long)]
        yes: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = match cli.config {
        Some(path) => ConfigStore::with_path(path),
        None => ConfigStore::new()?,
    };
    let config = store.load().await?;
    let discovery = KubernetesDiscovery::from_config(&config);

    match cli.command {
        Commands::Forward {
            context,
            namespace,
            service,
            service_port,
            local_port,
            kill_conflicting,
        } => {
            let kubectl = discovery
                .kubectl_path()
                .cloned()
                .context("kubectl not found; install it or set kubectlPath in the config")?;
            let manager = PortForwardManager::new(
                discovery,
                SystemPortResolver::new(),
                config.forward_settings(kubectl),
            );
            let tunnel = kubetunnel_core::TunnelConfig::new(
                context,
                namespace,
                service,
                service_port,
                local_port.unwrap_or(service_port),
            );
            commands::forward::run(&manager, tunnel, kill_conflicting, cli.json).await?;
        }
        Commands::Contexts => {
            commands::cluster::contexts(&discovery, cli.json).await?;
        }
        Commands::Namespaces { context } => {
            commands::cluster::namespaces(&discovery, context, cli.json).await?;
        }
        Commands::Services { context, namespace } => {
            commands::cluster::services(&discovery, context, &namespace, cli.json).await?;
        }
        Commands::PortOwner { port } => {
            commands::port::owner(port, cli.json).await?;
        }
        Commands::Kill { pid, yes } => {
            commands::port::kill(pid, yes).await?;
        }
        Commands::Config => {
            commands::config::show(&store, &config, cli.json)?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("KUBETUNNEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
