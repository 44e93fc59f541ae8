#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use sockbypass_agent::{config::default_pin_path, load_from_path, Config, LoggingConfig, Result};
use sockbypass_ebpf::{BypassProgram, DebugControl, LoadOptions, ProxyMapReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kernel bypass for sidecar-proxied TCP connections")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and attach the programs, then wait for SIGINT/SIGTERM
    Run {
        /// Path to configuration TOML file
        #[arg(short, long, value_name = "FILE", default_value = "/etc/sockbypass/agent.toml")]
        config: PathBuf,
    },
    /// Control redirect tracing of a running bypass
    Debug {
        #[command(subcommand)]
        action: DebugAction,
        /// Pin directory of the running bypass
        #[arg(long, value_name = "DIR", default_value_os_t = default_pin_path())]
        pin_path: PathBuf,
    },
    /// Dump the pinned proxy table and pending origins
    Entries {
        /// Pin directory of the running bypass
        #[arg(long, value_name = "DIR", default_value_os_t = default_pin_path())]
        pin_path: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum DebugAction {
    On,
    Off,
    /// Print the redirected data unit counter
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run { config } => match load_from_path(&config) {
            Ok(cfg) => {
                init_tracing(&cfg.logging);
                info!(object = %cfg.object.display(), interfaces = cfg.egress_interfaces.len(), "configuration loaded");
                run(cfg).await
            }
            Err(err) => {
                init_tracing(&LoggingConfig::default());
                error!(%err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        Command::Debug { action, pin_path } => {
            init_tracing(&LoggingConfig::default());
            debug(action, &pin_path)
        }
        Command::Entries { pin_path } => {
            init_tracing(&LoggingConfig::default());
            entries(&pin_path)
        }
    };

    if let Err(err) = outcome {
        error!(%err, "sockbypass-agent exited with error");
        std::process::exit(1);
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(logging.show_target)
        .init();
}

async fn run(cfg: Config) -> Result<()> {
    let opts = LoadOptions {
        object: cfg.object,
        pin_path: cfg.pin_path,
        cgroup_path: cfg.cgroup_path,
        egress_interfaces: cfg.egress_interfaces,
    };
    let program = BypassProgram::load(&opts)?;
    info!(pin_path = %program.pin_path().display(), "bypass active");

    wait_for_shutdown().await?;

    info!("shutting down");
    program.close()?;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

fn debug(action: DebugAction, pin_path: &Path) -> Result<()> {
    let mut control = DebugControl::open(pin_path)?;
    match action {
        DebugAction::On | DebugAction::Off => {
            let on = matches!(action, DebugAction::On);
            control.set_enabled(on)?;
            info!(enabled = on, "redirect tracing updated");
        }
        DebugAction::Stats => {
            println!(
                "debug: {}\nredirected: {}",
                if control.is_enabled()? { "on" } else { "off" },
                control.packet_count()?
            );
        }
    }
    Ok(())
}

fn entries(pin_path: &Path) -> Result<()> {
    let reader = ProxyMapReader::open(pin_path)?;

    for (tuple, entry) in reader.entries()? {
        println!("proxy   {tuple}  =>  {}  [{:?}]", entry.redirect, entry.state);
    }
    for (initiator, origin) in reader.pending()? {
        println!("pending {initiator}  =>  {origin}");
    }
    Ok(())
}
