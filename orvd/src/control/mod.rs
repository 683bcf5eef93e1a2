//! Control loop runner
//!
//! Owns one [`ZoneController`] per zone and drives them from a fixed interval:
//! each tick drains queued front-end commands, then for every zone reads the
//! temperature, steps the state machine and writes the resulting duty while
//! holding that zone's hardware guard. Snapshots are published after every tick.
//!
//! Front ends never touch the hardware. They hold a [`ControlHandle`], which reads
//! the published snapshots and queues commands for the next tick.

use orv_core::{
    OnboardLed, OrvError, OverrideRequest, Result, StaticConfig, Zone, ZoneController,
    ZoneHealth, ZoneSnapshot,
};
use orv_hardware::HardwareInterface;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Commands queued by the front ends, applied at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ControlCommand {
    Override(OverrideRequest),
    ClearOverride(Zone),
    SetLed { led: OnboardLed, on: bool },
}

type SharedSnapshots = Arc<RwLock<BTreeMap<Zone, ZoneSnapshot>>>;

/// Front-end access to the control loop.
#[derive(Clone)]
pub(crate) struct ControlHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshots: SharedSnapshots,
}

impl ControlHandle {
    /// Latest snapshot of every zone, in zone order.
    pub async fn snapshots(&self) -> Vec<ZoneSnapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }

    pub async fn snapshot(&self, zone: Zone) -> Option<ZoneSnapshot> {
        self.snapshots.read().await.get(&zone).cloned()
    }

    /// Latest mean temperature of a zone, `None` when the last read failed.
    pub async fn temperature(&self, zone: Zone) -> Option<f64> {
        self.snapshots
            .read()
            .await
            .get(&zone)
            .and_then(|snapshot| snapshot.temperature)
    }

    /// Queue an override. It takes effect on the next tick.
    ///
    /// # Errors
    ///
    /// Returns `OverrideValidation` for an out-of-range request, `Other` if the loop
    /// has stopped.
    pub fn submit_override(&self, request: OverrideRequest) -> Result<()> {
        request.validate()?;
        self.send(ControlCommand::Override(request))
    }

    /// Queue removal of a zone's override.
    pub fn clear_override(&self, zone: Zone) -> Result<()> {
        self.send(ControlCommand::ClearOverride(zone))
    }

    /// Queue an onboard LED state. It holds until the daemon next drives that LED.
    pub fn set_led(&self, led: OnboardLed, on: bool) -> Result<()> {
        self.send(ControlCommand::SetLed { led, on })
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| OrvError::Other("control loop is not running".to_string()))
    }
}

/// The control loop and every zone's runtime state
pub(crate) struct ControlLoop {
    hardware: Arc<HardwareInterface>,
    controllers: Vec<ZoneController>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    snapshots: SharedSnapshots,
    /// Last state written to the FAULT LED
    fault_led: Option<bool>,
}

impl ControlLoop {
    /// Build a controller per zone from the configured policies.
    pub fn new(
        hardware: Arc<HardwareInterface>,
        config: &StaticConfig,
        now: Instant,
    ) -> (Self, ControlHandle) {
        let limits = config.limits();
        let controllers: Vec<ZoneController> = Zone::ALL
            .into_iter()
            .map(|zone| {
                ZoneController::new(
                    zone,
                    config.policy_for(zone).clone(),
                    hardware.fan_count(zone),
                    hardware.thermistor_count(zone),
                    limits,
                    now,
                )
            })
            .collect();

        let snapshots = controllers
            .iter()
            .map(|controller| (controller.zone(), controller.snapshot(now)))
            .collect();
        let snapshots = Arc::new(RwLock::new(snapshots));
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = ControlHandle {
            commands: tx,
            snapshots: snapshots.clone(),
        };
        let control = Self {
            hardware,
            controllers,
            commands: rx,
            snapshots,
            fault_led: None,
        };
        (control, handle)
    }

    /// Run ticks on a fixed interval until `shutdown` flips or its sender drops.
    ///
    /// A tick in flight when shutdown arrives runs to completion.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Control loop running every {} ms", period.as_millis());
        if let Err(e) = self.hardware.set_onboard_led(OnboardLed::Run, true).await {
            warn!("Failed to switch on RUN LED: {}", e);
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                instant = interval.tick() => self.tick(instant.into_std()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Control loop stopped");
    }

    /// One pass over every zone.
    pub async fn tick(&mut self, now: Instant) {
        self.drain_commands(now).await;

        let mut any_fault = false;
        for controller in &mut self.controllers {
            let zone = controller.zone();
            let before = controller.health();

            let mut io = self.hardware.zone(zone).await;
            let reading = io.read_temperature().await;
            match &reading {
                Ok(celsius) => debug!("{}: {:.2}°C", zone, celsius),
                Err(OrvError::NoSensor(_)) => debug!("{}: no thermistor wired", zone),
                Err(e) if e.is_read_failure() => warn!("{}: read failed: {}", zone, e),
                Err(e) => error!("{}: unexpected read error: {}", zone, e),
            }

            if let Some(duty) = controller.step(reading, now) {
                let result = io.set_fan_duty(duty).await.map(|_| ());
                match &result {
                    Ok(()) => debug!("{}: duty {:.2} ({:?})", zone, duty, controller.phase()),
                    Err(e) => warn!("{}: write of duty {:.2} failed: {}", zone, duty, e),
                }
                controller.record_write(result);
            }
            drop(io);

            let after = controller.health();
            if after != before {
                match after {
                    ZoneHealth::Fault => error!(
                        "{}: FAULT after repeated read failures, fans forced to full duty",
                        zone
                    ),
                    ZoneHealth::Degraded => warn!("{}: degraded, holding duty", zone),
                    ZoneHealth::Ok => info!("{}: recovered", zone),
                }
            }
            any_fault |= after == ZoneHealth::Fault;
        }

        self.set_fault_led(any_fault).await;
        self.publish(now).await;
    }

    async fn drain_commands(&mut self, now: Instant) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ControlCommand::Override(request) => {
                    if let Some(controller) = self.controller_mut(request.zone) {
                        info!(
                            "{}: override to {:.2} for {}s",
                            request.zone, request.duty, request.ttl_secs
                        );
                        controller.apply_override(&request, now);
                    }
                }
                ControlCommand::ClearOverride(zone) => {
                    if let Some(controller) = self.controller_mut(zone) {
                        if controller.clear_override() {
                            info!("{}: override cleared", zone);
                        }
                    }
                }
                ControlCommand::SetLed { led, on } => {
                    match self.hardware.set_onboard_led(led, on).await {
                        Ok(()) => info!("{} LED {}", led, if on { "on" } else { "off" }),
                        Err(e) => warn!("Failed to set {} LED: {}", led, e),
                    }
                }
            }
        }
    }

    fn controller_mut(&mut self, zone: Zone) -> Option<&mut ZoneController> {
        self.controllers.iter_mut().find(|c| c.zone() == zone)
    }

    async fn set_fault_led(&mut self, on: bool) {
        if self.fault_led == Some(on) {
            return;
        }
        match self.hardware.set_onboard_led(OnboardLed::Fault, on).await {
            Ok(()) => self.fault_led = Some(on),
            Err(e) => warn!("Failed to set FAULT LED: {}", e),
        }
    }

    async fn publish(&self, now: Instant) {
        let snapshots = self
            .controllers
            .iter()
            .map(|controller| (controller.zone(), controller.snapshot(now)))
            .collect();
        *self.snapshots.write().await = snapshots;
    }
}
