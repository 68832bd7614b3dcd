#![deny(unsafe_code)]

//! brainstem CLI: the command-line control plane.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use brainstem_config::AppConfig;
use brainstem_core::build_info;
use brainstem_core::ipc::{IpcClient, Mode, StatusSnapshot};
use brainstem_core::reconnect::{ClientEvent, ReconnectController, RetryPolicy};

/// brainstem: the interaction-mode daemon and its control plane.
#[derive(Parser)]
#[command(name = "brainstem", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "brainstem.toml")]
    config: PathBuf,

    /// Override the daemon socket path from the config.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    Start,

    /// Show daemon status.
    Status,

    /// Check that the daemon answers.
    Ping,

    /// Switch the daemon's mode.
    Mode {
        /// idle, dictation, intelligent or agent.
        mode: Mode,
    },

    /// Stay connected and print link and mode changes.
    Watch,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(&cli.config)
        .await
        .with_context(|| format!("invalid config at '{}'", cli.config.display()))?;
    if let Some(socket) = &cli.socket {
        config.daemon.socket_path = Some(socket.display().to_string());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    match cli.command {
        Commands::Start => cmd_start(config).await?,
        Commands::Status => println!("{}", render_status(&cmd_status(&config).await?)),
        Commands::Ping => cmd_ping(&config).await?,
        Commands::Mode { mode } => {
            let mode = cmd_mode(&config, mode).await?;
            println!("mode: {mode}");
        }
        Commands::Watch => cmd_watch(&config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `-v` beats the config file; `RUST_LOG` beats both.
fn log_filter(verbose: u8, config: &AppConfig) -> String {
    match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

async fn cmd_start(config: AppConfig) -> Result<()> {
    info!(version = %build_info::version_string(), "starting brainstem daemon");
    let daemon = brainstem_core::Daemon::new(config);
    daemon.run().await.context("daemon failed")?;
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<StatusSnapshot> {
    let client = IpcClient::from_config(config);
    client
        .status()
        .await
        .with_context(|| format!("no status from daemon at '{}'", client.socket_path().display()))
}

async fn cmd_ping(config: &AppConfig) -> Result<()> {
    let client = IpcClient::from_config(config);
    let started = std::time::Instant::now();
    client
        .ping()
        .await
        .with_context(|| format!("daemon at '{}' did not answer", client.socket_path().display()))?;
    println!(
        "pong from {} in {:.1} ms",
        client.socket_path().display(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

async fn cmd_mode(config: &AppConfig, mode: Mode) -> Result<Mode> {
    let client = IpcClient::from_config(config);
    client
        .set_mode(mode)
        .await
        .with_context(|| format!("failed to switch to {mode}"))
}

async fn cmd_watch(config: &AppConfig) -> Result<()> {
    let client = IpcClient::from_config(config);
    let (controller, mut handle) =
        ReconnectController::new(client, RetryPolicy::from_config(&config.client));
    let task = tokio::spawn(controller.run());

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => println!("{}", render_event(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watch");
                break;
            }
        }
    }

    // The controller may already be gone; either way it is stopping.
    let _ = handle.shutdown().await;
    task.await.context("watch task panicked")?;
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn render_status(status: &StatusSnapshot) -> String {
    format!(
        "version: {}\nmode: {}\nhotkey registered: {}\nuptime: {}s",
        status.version,
        status.mode,
        if status.hotkey_registered { "yes" } else { "no" },
        status.uptime_secs
    )
}

fn render_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Link(state) => format!("link: {state}"),
        ClientEvent::Synced(status) => format!("synced: mode {}", status.mode),
        ClientEvent::ModeChanged(mode) => format!("mode: {mode}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainstem_core::reconnect::LinkState;
    use brainstem_test_utils::TestDaemon;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_mode_command() {
        let cli = Cli::try_parse_from(["brainstem", "mode", "Agent"]).unwrap();
        assert!(matches!(cli.command, Commands::Mode { mode: Mode::Agent }));
        assert_eq!(cli.config, PathBuf::from("brainstem.toml"));
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["brainstem", "mode", "turbo"]).is_err());
    }

    #[test]
    fn test_parse_global_options() {
        let cli =
            Cli::try_parse_from(["brainstem", "-vv", "-s", "/tmp/b.sock", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/b.sock")));
    }

    #[test]
    fn test_log_filter_precedence() {
        let mut config = AppConfig::default();
        config.logging.level = "warn".to_string();
        assert_eq!(log_filter(0, &config), "warn");
        assert_eq!(log_filter(1, &config), "debug");
        assert_eq!(log_filter(5, &config), "trace");
    }

    #[test]
    fn test_render_status() {
        let status = StatusSnapshot {
            version: "0.1.0".to_string(),
            mode: Mode::Dictation,
            hotkey_registered: true,
            uptime_secs: 42,
        };
        assert_eq!(
            render_status(&status),
            "version: 0.1.0\nmode: dictation\nhotkey registered: yes\nuptime: 42s"
        );
    }

    #[test]
    fn test_render_events() {
        assert_eq!(
            render_event(&ClientEvent::Link(LinkState::Connecting)),
            "link: connecting"
        );
        assert_eq!(render_event(&ClientEvent::ModeChanged(Mode::Agent)), "mode: agent");
    }

    #[test_log::test(tokio::test)]
    async fn test_commands_against_running_daemon() {
        let daemon = TestDaemon::start().await;
        let config = daemon.config().clone();

        cmd_ping(&config).await.unwrap();
        assert_eq!(cmd_mode(&config, Mode::Agent).await.unwrap(), Mode::Agent);
        assert_eq!(cmd_status(&config).await.unwrap().mode, Mode::Agent);
    }

    #[tokio::test]
    async fn test_status_without_daemon_fails_with_context() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.daemon.socket_path = Some(dir.path().join("none.sock").display().to_string());

        let err = cmd_status(&config).await.unwrap_err();
        assert!(err.to_string().contains("no status from daemon"));
    }
}
