use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omni_plugin_host::api::ApiServer;
use omni_plugin_host::config::RootFolder;
use omni_plugin_host::package::ScriptBuildQueue;
use omni_plugin_host::{HostConfig, PluginHost};

/// Omni plugin host - discovers, loads and hot-swaps plugin packages
#[derive(Parser)]
#[command(name = "omni-plugins", version, about)]
struct Cli {
    /// Config file (defaults to the standard config location)
    #[arg(short, long, env = "OMNI_PLUGINS_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "OMNI_PLUGINS_PORT")]
    port: Option<u16>,

    /// Plugin root folder; repeat for several (replaces configured roots)
    #[arg(short, long = "root")]
    roots: Vec<PathBuf>,

    /// Scan roots given with --root once, without watching them
    #[arg(long)]
    no_watch: bool,

    /// Skip package build scripts (`omni.build`)
    #[arg(long, env = "OMNI_PLUGINS_NO_BUILD")]
    no_build: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the roots once, print packages and plugins as JSON, and exit
    Scan,
    /// Print the config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,omni_plugin_host=info",
        1 => "info,omni_plugin_host=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Some(Command::ConfigPath)) {
        match omni_plugin_host::config::file::config_file_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("no config directory on this platform"),
        }
        return Ok(());
    }

    let mut config = HostConfig::load(cli.config.as_deref())?;
    if !cli.roots.is_empty() {
        config.roots = cli
            .roots
            .iter()
            .map(|path| RootFolder::new(path, !cli.no_watch))
            .collect();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    if matches!(cli.command, Some(Command::Scan)) {
        for root in &mut config.roots {
            root.watch = false;
        }
        return scan(build_host(config, cli.no_build)).await;
    }

    tracing::info!(
        port = config.server.port,
        roots = config.roots.len(),
        "starting plugin host"
    );

    let host = build_host(config, cli.no_build);
    host.start().await?;

    ApiServer::new(&host).run(shutdown_signal()).await?;

    host.shutdown().await;
    Ok(())
}

/// Host that runs build scripts unless `no_build` is set
fn build_host(config: HostConfig, no_build: bool) -> PluginHost {
    let builder = PluginHost::builder(config);
    if no_build {
        builder.build()
    } else {
        builder.build_queue(ScriptBuildQueue::spawn()).build()
    }
}

async fn scan(host: PluginHost) -> anyhow::Result<()> {
    host.start().await?;
    host.settle().await;

    let report = serde_json::json!({
        "packages": host.registry().packages(),
        "plugins": host.registry().plugins(),
        "noLoader": host.registry().plugins_with_no_loader(),
        "unmetRequirements": host.registry().plugins_with_unmet_requirements(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    host.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
