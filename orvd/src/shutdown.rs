//! Shutdown handling for graceful daemon termination
//!
//! However the daemon ends, the fans are left at the configured safe duty.

use orv_hardware::HardwareInterface;
use tokio::signal;
use tracing::{error, info, warn};

/// Wait for Ctrl+C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Drive every fan to `safe_duty` and switch the RUN and WEB LEDs off.
///
/// Failures are logged; every output is still attempted.
pub(crate) async fn release_hardware(hardware: &HardwareInterface, safe_duty: f64) {
    match hardware.release(safe_duty).await {
        Ok(()) => info!("Hardware released, fans at {:.0}%", safe_duty * 100.0),
        Err(e) => warn!("Hardware release incomplete: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_core::{
        BeagleBoneBlackV100, BoardConfig, OnboardLed, PinTableEntry, WireMapping, Zone,
        DEFAULT_WIRE_MAPPING_JSON,
    };
    use orv_hardware::{HardwareSettings, SimulatedDriver};

    const PINS: &PinTableEntry = &BeagleBoneBlackV100::PINS;

    fn hardware() -> (HardwareInterface, SimulatedDriver) {
        let mapping = WireMapping::from_json(DEFAULT_WIRE_MAPPING_JSON, PINS).unwrap();
        let sim = SimulatedDriver::new(PINS.adc_max_counts);
        let hardware =
            HardwareInterface::new(mapping, PINS, Box::new(sim.clone()), HardwareSettings::default())
                .unwrap();
        (hardware, sim)
    }

    #[tokio::test]
    async fn test_release_sets_safe_duty() {
        let (hardware, sim) = hardware();
        hardware.set_fan_duty(Zone::IntakeLower, 0.2).await.unwrap();
        hardware.set_onboard_led(OnboardLed::Run, true).await.unwrap();
        hardware.set_onboard_led(OnboardLed::Web, true).await.unwrap();

        release_hardware(&hardware, 1.0).await;

        for port in hardware.mapping().all_fans() {
            assert_eq!(sim.duty(PINS.fan(port).unwrap()), Some(1.0), "{}", port);
        }
        assert_eq!(sim.gpio(PINS.led(OnboardLed::Run).unwrap()), Some(false));
        assert_eq!(sim.gpio(PINS.led(OnboardLed::Web).unwrap()), Some(false));
    }

    #[tokio::test]
    async fn test_release_survives_write_failures() {
        let (hardware, sim) = hardware();
        sim.fail_writes(true);

        release_hardware(&hardware, 1.0).await;
        assert_eq!(sim.pwm_writes(), 0);

        // A later attempt still goes through
        sim.fail_writes(false);
        release_hardware(&hardware, 0.5).await;
        assert!(sim.pwm_writes() > 0);
    }
}
