//! Impact Control - controller input monitor for the Impact Synth rig
//!
//! Opens every MIDI input, keeps the latest controller values, and prints
//! Control Change traffic until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use impact_control::backend::{detect_backend, BackendSelection, MidiBackend};
use impact_control::{
    callback, AppConfig, BackendPreference, Brightness, ControlEvent, ControllerManager,
    LoopbackBackend,
};

/// Controller the demo sweep and the frame tick use for the horizontal line
const H_POS_CC: u8 = 21;
/// Controller for the vertical line
const V_POS_CC: u8 = 22;

/// Impact Control - MIDI controller input for the Impact Synth visual rig
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "impact.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Backend override (auto, midir, loopback, none)
    #[arg(short, long, value_enum)]
    backend: Option<BackendPreference>,

    /// List available MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Render loop rate used to sample controller state
    #[arg(long, default_value = "30")]
    fps: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_json)?;

    info!("Starting Impact Control...");
    info!("Configuration file: {}", args.config);

    let mut config = AppConfig::load_or_default(&args.config).await?;
    if let Some(backend) = args.backend {
        config.midi.backend = backend;
    }

    if args.list_ports {
        list_ports_formatted(&config);
        return Ok(());
    }

    // The loopback backend is driven from here, so keep a handle to it
    // Port discovery and opening block on the platform MIDI stack
    let (manager, loopback) = if config.midi.backend == BackendPreference::Loopback {
        let backend = LoopbackBackend::new(config.midi.loopback_ports.iter().cloned());
        let options = config.midi.session_options();
        let shared: Arc<dyn MidiBackend> = Arc::new(backend.clone());
        let manager =
            tokio::task::spawn_blocking(move || ControllerManager::with_backend(shared, options))
                .await
                .context("MIDI startup task failed")?;
        (manager, Some(backend))
    } else {
        let settings = config.midi.clone();
        let manager = tokio::task::spawn_blocking(move || ControllerManager::start(&settings))
            .await
            .context("MIDI startup task failed")?;
        (manager, None)
    };

    run_app(manager, loopback, &config, args.fps.max(1)).await?;

    info!("Impact Control shutdown complete");
    Ok(())
}

async fn run_app(
    mut manager: ControllerManager,
    loopback: Option<LoopbackBackend>,
    config: &AppConfig,
    fps: u32,
) -> Result<()> {
    if manager.is_connected() {
        info!("Connected devices: {:?}", manager.connected_devices());
    } else {
        println!("{}", "No MIDI devices connected".yellow());
    }

    let brightness = Brightness::default();
    if config.brightness.enabled {
        brightness.attach(&manager, config.brightness.cc);
        info!("Brightness bound to CC{}", config.brightness.cc);
    }

    let monitor = callback(|event| {
        print_event(event);
        Ok(())
    });
    for controller in 0..=127u8 {
        manager.subscribe(controller, monitor.clone());
    }

    let sweep = loopback.map(|backend| tokio::spawn(demo_sweep(backend)));

    println!("\n{}", "Monitoring controller input... (Ctrl+C to exit)".green());
    println!("{}\n", "─".repeat(60).dimmed());

    let mut frame = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    let mut last_seen = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = frame.tick() => {
                // Same reads a visual module performs once per frame
                let h_pos = manager.state().get_normalized(H_POS_CC, 0.5);
                let v_pos = manager.state().get_normalized(V_POS_CC, 0.5);
                let order = manager.last_event().map(|e| e.arrival_order);
                if order != last_seen {
                    last_seen = order;
                    debug!(
                        "frame: h={:.2} v={:.2} brightness={:.2}",
                        h_pos,
                        v_pos,
                        brightness.get()
                    );
                }
            }
        }
    }

    if let Some(task) = sweep {
        task.abort();
    }

    for controller in 0..=127u8 {
        manager.unsubscribe(controller, &monitor);
    }
    // Each session may wait out its shutdown timeout
    tokio::task::spawn_blocking(move || manager.close())
        .await
        .context("MIDI shutdown task failed")?;
    Ok(())
}

/// Feed the loopback port with a slow sweep on the crosshair controllers
async fn demo_sweep(backend: LoopbackBackend) {
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut phase: f32 = 0.0;
    loop {
        tick.tick().await;
        phase += 0.05;
        let h = ((phase.sin() * 0.5 + 0.5) * 127.0) as u8;
        let v = (((phase * 0.7).cos() * 0.5 + 0.5) * 127.0) as u8;
        backend.send_cc(0, 0, H_POS_CC, h);
        backend.send_cc(0, 0, V_POS_CC, v);
    }
}

fn print_event(event: &ControlEvent) {
    let device = if event.device.len() > 20 {
        format!("{}...", event.device.chars().take(17).collect::<String>())
    } else {
        event.device.to_string()
    };

    println!(
        "[{:>8}] {:20} | {} {} {}",
        event.arrival_order.to_string().dimmed(),
        device.white(),
        format!("ch:{:<2}", event.channel + 1).cyan(),
        format!("cc:{:<3}", event.controller).bright_yellow(),
        format!("v:{:<3}", event.value).bright_green(),
    );
}

/// List all input ports in a formatted way
fn list_ports_formatted(config: &AppConfig) {
    println!("\n{}", "=== Available MIDI Input Ports ===".bold().cyan());

    let backend = match detect_backend(&config.midi) {
        BackendSelection::Selected(backend) => backend,
        BackendSelection::Unavailable { reason } => {
            println!("  {} {}", "No MIDI backend:".red(), reason.dimmed());
            println!();
            return;
        }
    };

    println!("Backend: {}\n", backend.name().bright_white());
    match backend.enumerate() {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No input ports found".dimmed());
        }
        Ok(ports) => {
            for port in ports {
                println!("  {}: {}", port.index.to_string().green(), port.name);
            }
        }
        Err(e) => println!("  {} {}", "Enumeration failed:".red(), e),
    }

    println!();
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
