use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use parksense::app::Session;
use parksense::config::AppConfig;
use parksense::device_config::ParkingType;
use parksense::persistence::default_settings_path;
use parksense::state::View;
use parksense::uart::{self, SerialConnector};

const REFRESH_MS: u64 = 200;

#[derive(Parser)]
#[command(name = "parksense", about = "Parking sensor dashboard over a serial AT link")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[arg(short, long, global = true)]
    baud: Option<u32>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Connect, print telemetry and accept commands on stdin
    Monitor {
        /// Do not save the device config after `:save`
        #[arg(long)]
        no_save: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(port) = cli.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }

    match cli.command {
        Commands::Ports => {
            let ports = uart::available_ports();
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
        Commands::Monitor { no_save } => {
            if !no_save && config.settings_path.is_none() {
                config.settings_path = Some(default_settings_path());
            }
            monitor(config)
        }
    }
}

fn monitor(config: AppConfig) -> Result<()> {
    let session = Session::new(&config);
    let mut connector = SerialConnector::new(config.serial.clone());
    session
        .connect(&mut connector)
        .context("Failed to connect to sensor")?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut last_telemetry = None;
    let mut last_config = None;

    loop {
        match rx.recv_timeout(Duration::from_millis(REFRESH_MS)) {
            Ok(line) => match handle_input(&session, line.trim()) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!("{e:#}"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let telemetry = session.telemetry();
        if last_telemetry.as_ref() != Some(&telemetry) {
            println!("telemetry {}", serde_json::to_string(&telemetry)?);
            last_telemetry = Some(telemetry);
        }

        let device_config = session.config();
        if last_config.as_ref() != Some(&device_config) {
            println!("config {}", serde_json::to_string(&device_config)?);
            last_config = Some(device_config);
        }
    }

    session.disconnect();
    info!("monitor stopped");
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_input(session: &Session, line: &str) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let Some(intent) = line.strip_prefix(':') else {
        session.send_raw(line);
        return Ok(true);
    };

    let mut parts = intent.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (verb, args.as_slice()) {
        ("quit" | "q", _) => return Ok(false),
        ("refresh", _) => {
            session.refresh();
        }
        ("cali", _) => {
            session.calibrate();
        }
        ("reboot", _) => {
            session.reboot();
        }
        ("radar", _) => {
            session.toggle_radar();
        }
        ("park", [code]) => {
            let kind = code
                .parse()
                .ok()
                .and_then(ParkingType::from_code)
                .context("park type must be 0 or 1")?;
            session.set_park_type(kind);
        }
        ("th", [target, cover]) => {
            session
                .set_config_field("target_threshold", target)
                .map_err(anyhow::Error::msg)?;
            session
                .set_config_field("cover_threshold", cover)
                .map_err(anyhow::Error::msg)?;
            session.apply_thresholds();
        }
        ("mode", [mode]) => session
            .set_config_field("comm_mode", mode)
            .map_err(anyhow::Error::msg)?,
        ("view", [view]) => session.set_view(match *view {
            "data" => View::Data,
            "settings" => View::Settings,
            "logs" => View::Logs,
            other => bail!("unknown view '{other}'"),
        }),
        ("set", [field, value @ ..]) => session
            .set_config_field(field, &value.join(" "))
            .map_err(anyhow::Error::msg)?,
        ("save", _) => {
            session.save_config();
        }
        ("hex", bytes) => session.send_hex(&bytes.join(" "))?,
        ("log", _) => {
            for entry in session.logs() {
                println!("{entry}");
            }
        }
        ("clear", _) => session.clear_logs(),
        _ => bail!("unknown command ':{intent}'"),
    }
    Ok(true)
}
