// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! rockpi-penta: top-board daemon. Samples the key, drives the fans and feeds
//! the status slider. `rockpi-penta open-pwm-i2c` performs the one-time boot
//! configuration instead.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rockpi_penta::board::{self, Gpio, Pwm};
use rockpi_penta::boot;
use rockpi_penta::button::{self, Classifier};
use rockpi_penta::config::{self, Config};
use rockpi_penta::control::Controller;
use rockpi_penta::coord::{self, SharedState, Shutdown};
use rockpi_penta::display::{LogDisplay, Renderer};
use rockpi_penta::fan::FanController;
use rockpi_penta::telemetry::Telemetry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "rockpi-penta", about = "ROCK Pi Penta top-board daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enable pwm0, pwm1 and i2c7 in the boot interface configuration.
    #[command(alias = "open_pwm_i2c")]
    OpenPwmI2c {
        /// Boot interface configuration file to edit.
        #[arg(long, default_value = boot::HW_INTFC_PATH)]
        boot_config: PathBuf,
    },

    /// Print the effective configuration as TOML.
    PrintConfig,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    match cli.command {
        Some(Command::OpenPwmI2c { boot_config }) => open_pwm_i2c(&boot_config),
        Some(Command::PrintConfig) => {
            print!("{}", config::render_config(&cfg)?);
            Ok(())
        }
        None => run_daemon(cfg).await,
    }
}

fn open_pwm_i2c(path: &Path) -> anyhow::Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        log::warn!("Not running as root, editing {} will likely fail", path.display());
    }
    let changed = boot::open_pwm_i2c(path)
        .with_context(|| format!("Failed to update {}", path.display()))?;
    if changed {
        log::info!("Reboot for the new interfaces to take effect");
    }
    Ok(())
}

async fn run_daemon(cfg: Config) -> anyhow::Result<()> {
    if let Err(e) = cfg.validate() {
        bail!("Invalid configuration: {e}");
    }

    // Hardware
    let key = Gpio::open_input(cfg.board.button_gpio)
        .with_context(|| format!("Failed to open key gpio{}", cfg.board.button_gpio))?;

    if let Some(line) = cfg.board.enable_gpio {
        if let Err(e) = board::set_line(line, cfg.board.enable_level) {
            log::error!("Failed to drive gpio{line}: {e}");
        }
    }

    let pwms: Vec<Pwm> = cfg
        .board
        .pwm
        .iter()
        .filter_map(|ch| match Pwm::open(ch.chip, ch.channel, cfg.board.pwm_period_ns) {
            Ok(pwm) => Some(pwm),
            Err(e) => {
                log::error!("Failed to open pwmchip{}/pwm{}: {e}", ch.chip, ch.channel);
                None
            }
        })
        .collect();
    if pwms.is_empty() {
        log::warn!("No fan PWM channel available, fan control disabled");
    }
    log::info!("Opened key gpio{} and {} fan channel(s)", key.number, pwms.len());

    // Coordination
    let shared = Arc::new(SharedState::new());
    let shutdown = Shutdown::new();
    let (events_tx, events_rx) = coord::event_channel();

    let period = Duration::from_secs_f64(1.0 / cfg.board.sample_rate);
    let sampler = button::spawn_sampler(
        key,
        Classifier::from_config(&cfg),
        period,
        events_tx,
        shutdown.clone(),
    )
    .context("Failed to start key sampler")?;

    // Signal handler
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
        shutdown_signal.trigger();
    });

    // Control loop
    let fan = FanController::new(cfg.fan.levels(), pwms);
    let renderer = Renderer::spawn(Telemetry::new(&cfg), LogDisplay::new(cfg.oled.rotate));
    let controller = Controller::new(&cfg, shared, renderer, fan);
    controller.run(events_rx, shutdown.clone()).await;

    // The loop can also end on its own; make sure the sampler sees it.
    shutdown.trigger();
    let joined = tokio::task::spawn_blocking(move || sampler.join()).await?;
    if joined.is_err() {
        log::error!("Key sampler panicked");
    }

    log::info!("Daemon stopped");
    Ok(())
}
