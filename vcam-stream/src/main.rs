//! vcam-stream: entry point.
//!
//! ```text
//! vcam-stream --port /dev/ttyUSB0      Stream from a camera
//! vcam-stream --simulate               Stream from the built-in simulator
//! vcam-stream --list-ports             List serial ports and exit
//! vcam-stream --config <path>          Load a custom config TOML
//! vcam-stream --gen-config             Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vcam_core::port;
use vcam_stream::config::StreamConfig;
use vcam_stream::select::ConfiguredPort;
use vcam_stream::service::StreamService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vcam-stream", about = "Stream JPEG frames from a UART camera module")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vcam-stream.toml")]
    config: PathBuf,

    /// Serial device, overriding `serial.port`.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overriding `serial.baud`.
    #[arg(short, long)]
    baud: Option<u32>,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Use the built-in simulated camera instead of hardware.
    #[arg(long)]
    simulate: bool,

    /// Print capture loop events to stdout as JSON lines.
    #[arg(long)]
    events_json: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", StreamConfig::default_toml()?);
        return Ok(());
    }

    // --list-ports: enumerate and exit. Logging is not set up yet.
    if cli.list_ports {
        let ports = port::available_ports().unwrap_or_else(|e| {
            eprintln!("failed to enumerate serial ports: {e}");
            std::process::exit(1);
        });
        if ports.is_empty() {
            println!("no serial ports found");
        }
        for name in ports {
            println!("{name}");
        }
        return Ok(());
    }

    // Load config.
    let config = StreamConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("vcam-stream v{}", env!("CARGO_PKG_VERSION"));

    let selector = ConfiguredPort::new(cli.port, cli.baud, &config.serial);
    let service = StreamService::new(config, selector)
        .simulate(cli.simulate)
        .events_json(cli.events_json);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.stop();
    });

    if let Err(e) = service.run().await {
        error!("{e}");
        return Err(e);
    }

    Ok(())
}
