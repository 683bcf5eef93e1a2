//! Open Rack Vent Daemon
//!
//! Runs the thermal control loop for an Open Rack Vent board and exposes it over
//! an HTTP API and, optionally, MQTT with Home Assistant discovery.
//!
//! Startup resolves the board's pin table, validates the wire mapping against it
//! and binds the hardware. Any failure there aborts with exit status 1 before a
//! single pin is touched. Once running, the fans are released to the configured
//! safe duty on every exit path.

mod api;
mod config;
mod control;
mod mqtt;
mod shutdown;

use anyhow::{Context, Result};
use api::AppState;
use clap::Parser;
use control::ControlLoop;
use mqtt::MqttAdapter;
use orv_core::config::ServerConfig;
use orv_core::{
    default_config_path, OnboardLed, PcbRevision, PinTable, Platform, StaticConfig, WireMapping, Zone,
};
use orv_hardware::{HardwareInterface, HardwareSettings, PinDriver, SimulatedDriver, SysfsDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Open Rack Vent Daemon
#[derive(Parser, Debug)]
#[command(name = "orvd")]
#[command(version, about = "Open Rack Vent thermal control daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "ORV_CONFIG")]
    config: Option<PathBuf>,

    /// Platform driving the PCB (e.g. BeagleBoneBlack)
    #[arg(long)]
    platform: Option<String>,

    /// PCB revision (e.g. v1.0.0)
    #[arg(long)]
    pcb_revision: Option<String>,

    /// Wire mapping JSON, replacing the one in the config file
    #[arg(long, env = "ORV_WIRE_MAPPING_JSON")]
    wire_mapping_json: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable mock mode (simulated pins, no hardware access)
    #[arg(long)]
    mock: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything startup produces
struct Daemon {
    config: StaticConfig,
    hardware: Arc<HardwareInterface>,
    revision: PcbRevision,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.verbose);

    info!("Open Rack Vent daemon starting...");

    let daemon = match startup(&args).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = run(&daemon).await;
    shutdown::release_hardware(&daemon.hardware, daemon.config.shutdown.safe_duty).await;

    if let Err(e) = result {
        error!("Daemon failed: {:#}", e);
        std::process::exit(1);
    }
    info!("Daemon shutdown complete");
}

/// Load configuration, resolve the board and bind the wire mapping to it.
async fn startup(args: &Args) -> Result<Daemon> {
    // Config path: CLI flag or ORV_CONFIG > default
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    info!("Configuration file: {}", config_path.display());

    let mut config = config::load_or_create(&config_path).await?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;

    let platform: Platform = config.platform.parse()?;
    let revision: PcbRevision = config.pcb_revision.parse()?;
    let pins = PinTable::resolve(platform, revision)?;
    info!("Board: {} ({} {})", pins.name, platform, revision);

    let mapping =
        WireMapping::from_json(config.wire_mapping_json(), pins).context("Invalid wire mapping")?;
    for zone in Zone::ALL {
        info!(
            "  {}: fans {:?}, thermistors {:?}",
            zone,
            mapping.fans(zone).iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            mapping
                .thermistors(zone)
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
        );
    }

    let driver: Box<dyn PinDriver> = if args.mock {
        info!("Mock mode: pins are simulated");
        Box::new(SimulatedDriver::new(pins.adc_max_counts))
    } else {
        Box::new(SysfsDriver::new())
    };

    let settings = HardwareSettings {
        io_timeout: config.io_timeout(),
        pwm_period_ns: config.control.pwm_period_ns,
    };
    let hardware = HardwareInterface::new(mapping, pins, driver, settings)?;

    Ok(Daemon {
        config,
        hardware: Arc::new(hardware),
        revision,
    })
}

/// CLI flags take precedence over the config file.
fn apply_overrides(config: &mut StaticConfig, args: &Args) {
    if let Some(platform) = &args.platform {
        config.platform = platform.clone();
    }
    if let Some(revision) = &args.pcb_revision {
        config.pcb_revision = revision.clone();
    }
    if let Some(json) = &args.wire_mapping_json {
        config.wire_mapping = Some(json.clone());
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
}

/// Run the control loop and front ends until a shutdown signal arrives.
///
/// Returns once the control loop has finished its last tick.
async fn run(daemon: &Daemon) -> Result<()> {
    let config = &daemon.config;
    let wire_mapping = serde_json::to_value(daemon.hardware.mapping())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (control, handle) = ControlLoop::new(daemon.hardware.clone(), config, Instant::now());
    let control_task = tokio::spawn(control.run(config.tick_interval(), shutdown_rx.clone()));

    let mqtt_task = if config.mqtt.enabled {
        let adapter = MqttAdapter::new(config.mqtt.clone(), daemon.revision, handle.clone());
        Some(tokio::spawn(adapter.run(shutdown_rx.clone())))
    } else {
        info!("MQTT adapter disabled");
        None
    };

    let served = if config.server.enabled {
        let state = AppState::new(
            handle,
            daemon.hardware.board_info().clone(),
            wire_mapping,
            config.control.tick_interval_ms,
            config.mqtt.enabled,
        );
        serve_http(&config.server, state).await
    } else {
        info!("HTTP API disabled");
        shutdown::shutdown_signal().await;
        Ok(())
    };

    // Stop the loop and adapters whether the server exited cleanly or not
    let _ = shutdown_tx.send(true);
    if let Err(e) = control_task.await {
        error!("Control loop task failed: {}", e);
    }
    if let Some(task) = mqtt_task {
        if let Err(e) = task.await {
            error!("MQTT task failed: {}", e);
        }
    }

    served
}

async fn serve_http(server: &ServerConfig, state: AppState) -> Result<()> {
    let control = state.control.clone();
    let app = api::create_router(state);

    let bind_addr = format!("{}:{}", server.hostname, server.port);
    info!("Starting server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("Open Rack Vent API listening on {}", bind_addr);
    if let Err(e) = control.set_led(OnboardLed::Web, true) {
        warn!("Failed to queue WEB LED: {}", e);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["orvd"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = StaticConfig::default();
        let json = r#"{"version": 1, "fans": {}, "thermistors": {}}"#;
        apply_overrides(
            &mut config,
            &args(&[
                "--platform",
                "beagleboneblack",
                "--pcb-revision",
                "v1.0.0",
                "--wire-mapping-json",
                json,
                "--port",
                "8080",
            ]),
        );

        assert_eq!(config.platform, "beagleboneblack");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.wire_mapping_json(), json);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut config = StaticConfig::default();
        apply_overrides(&mut config, &args(&["--mock"]));
        assert_eq!(config, StaticConfig::default());
    }

    #[tokio::test]
    async fn test_startup_in_mock_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_arg = path.to_string_lossy().to_string();

        let daemon = startup(&args(&["--mock", "--config", &path_arg]))
            .await
            .unwrap();
        assert_eq!(daemon.revision, PcbRevision::V100);
        assert_eq!(daemon.hardware.fan_count(Zone::IntakeLower), 2);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_startup_rejects_bad_wiring() {
        let dir = tempfile::tempdir().unwrap();
        let path_arg = dir.path().join("config.toml").to_string_lossy().to_string();
        let conflicting = r#"{
            "version": 1,
            "fans": {"INTAKE_LOWER": ["PN1"], "EXHAUST_UPPER": ["PN1"]},
            "thermistors": {}
        }"#;

        let result = startup(&args(&[
            "--mock",
            "--config",
            &path_arg,
            "--wire-mapping-json",
            conflicting,
        ]))
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_web_led_lit_while_serving() {
        use orv_core::{BeagleBoneBlackV100, BoardConfig, DEFAULT_WIRE_MAPPING_JSON};
        use orv_hardware::HardwareSettings;
        use std::time::Duration;

        let pins = &BeagleBoneBlackV100::PINS;
        let mapping = WireMapping::from_json(DEFAULT_WIRE_MAPPING_JSON, pins).unwrap();
        let sim = SimulatedDriver::new(pins.adc_max_counts);
        let hardware = Arc::new(
            HardwareInterface::new(mapping, pins, Box::new(sim.clone()), HardwareSettings::default())
                .unwrap(),
        );
        let (mut control, handle) =
            ControlLoop::new(hardware.clone(), &StaticConfig::default(), Instant::now());
        let state = AppState::new(
            handle,
            hardware.board_info().clone(),
            serde_json::Value::Null,
            1000,
            false,
        );
        let server = ServerConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let task = tokio::spawn(async move { serve_http(&server, state).await });

        let web = pins.led(OnboardLed::Web).unwrap();
        let mut lit = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            control.tick(Instant::now()).await;
            if sim.gpio(web) == Some(true) {
                lit = true;
                break;
            }
        }
        task.abort();
        assert!(lit);
    }

    #[tokio::test]
    async fn test_startup_rejects_unknown_platform() {
        let dir = tempfile::tempdir().unwrap();
        let path_arg = dir.path().join("config.toml").to_string_lossy().to_string();

        let result = startup(&args(&[
            "--mock",
            "--config",
            &path_arg,
            "--platform",
            "RaspberryPi",
        ]))
        .await;
        assert!(result.is_err());
    }
}
