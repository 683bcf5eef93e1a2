//! Per-zone thermal state machine
//!
//! A [`ZoneController`] owns one zone's runtime state. It is fed one reading per tick
//! and answers with the duty to write, if any. It performs no I/O and takes the
//! current [`Instant`] as an argument.
//!
//! Duty precedence, highest first: fault (full duty), manual override, degraded
//! hold, automatic control.

use super::curve::DutyCurve;
use super::policy::ZonePolicy;
use crate::error::{OrvError, Result};
use crate::types::{OverrideRequest, ThermalPhase, Zone, ZoneHealth, ZoneSnapshot, ZoneStatus};
use std::sync::Arc;
use std::time::Instant;

const EPSILON: f64 = 1e-9;

/// Limits shared by every zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlLimits {
    /// Consecutive failed reads before a zone is marked faulted
    pub failure_threshold: u32,
    /// Duty held until a zone's first successful reading
    pub startup_duty: f64,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            startup_duty: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ManualOverride {
    duty: f64,
    expires_at: Instant,
    /// Duty held before the override, restored if no reading can take over
    resume_duty: f64,
}

/// Runtime state and decision logic for one zone.
#[derive(Debug)]
pub struct ZoneController {
    zone: Zone,
    policy: ZonePolicy,
    curve: Arc<dyn DutyCurve>,
    limits: ControlLimits,
    fan_count: usize,
    thermistor_count: usize,

    phase: ThermalPhase,
    health: ZoneHealth,
    duty: f64,
    temperature: Option<f64>,
    consecutive_failures: u32,
    manual: Option<ManualOverride>,
    /// Set when an override ends, consumed by the next step
    released: Option<f64>,
    /// The phase just moved from idle or cooling to warming
    entered_warming: bool,
    last_change: Instant,
    last_error: Option<String>,
    /// The current duty has not been confirmed written
    write_pending: bool,
    /// A real reading has replaced the startup duty
    settled: bool,
}

impl ZoneController {
    /// Create a controller using the policy's own curve.
    pub fn new(
        zone: Zone,
        policy: ZonePolicy,
        fan_count: usize,
        thermistor_count: usize,
        limits: ControlLimits,
        now: Instant,
    ) -> Self {
        let curve: Arc<dyn DutyCurve> = Arc::new(policy.curve.clone());
        let duty = if fan_count > 0 {
            limits.startup_duty.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            zone,
            policy,
            curve,
            limits,
            fan_count,
            thermistor_count,
            phase: ThermalPhase::Idle,
            health: ZoneHealth::Ok,
            duty,
            temperature: None,
            consecutive_failures: 0,
            manual: None,
            released: None,
            entered_warming: false,
            last_change: now,
            last_error: None,
            write_pending: true,
            settled: false,
        }
    }

    /// Replace the duty curve.
    pub fn with_curve(mut self, curve: Arc<dyn DutyCurve>) -> Self {
        self.curve = curve;
        self
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn duty(&self) -> f64 {
        self.duty
    }

    pub fn phase(&self) -> ThermalPhase {
        self.phase
    }

    pub fn health(&self) -> ZoneHealth {
        self.health
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn has_fans(&self) -> bool {
        self.fan_count > 0
    }

    pub fn status(&self) -> ZoneStatus {
        match (self.health, self.manual) {
            (ZoneHealth::Fault, _) => ZoneStatus::Fault,
            (_, Some(_)) => ZoneStatus::Override,
            (ZoneHealth::Degraded, None) => ZoneStatus::Degraded,
            (ZoneHealth::Ok, None) => self.phase.into(),
        }
    }

    /// Advance one tick with this tick's temperature reading.
    ///
    /// Returns the duty to write, or `None` when the last written duty still stands.
    /// After writing, report the outcome with [`record_write`](Self::record_write).
    pub fn step(&mut self, reading: Result<f64>, now: Instant) -> Option<f64> {
        self.expire_override(now);
        let released = self.released.take();

        match reading {
            Ok(celsius) if celsius.is_finite() => self.record_reading(celsius),
            Ok(celsius) => self.record_failure(OrvError::ReadFailure {
                target: self.zone.to_string(),
                reason: format!("non-finite temperature {}", celsius),
            }),
            // Wiring fact rather than a transient failure: never escalates
            Err(err @ OrvError::NoSensor(_)) => {
                self.temperature = None;
                self.health = ZoneHealth::Degraded;
                self.last_error = Some(err.to_string());
            }
            Err(err) => self.record_failure(err),
        }

        let next = match (self.health, self.manual) {
            (ZoneHealth::Fault, _) => {
                self.settled = true;
                1.0
            }
            (_, Some(manual)) => {
                self.settled = true;
                manual.duty
            }
            // Without a fresh reading an ended override must not keep its duty
            (ZoneHealth::Degraded, None) => released.unwrap_or(self.duty),
            (ZoneHealth::Ok, None) => self.automatic_duty(),
        };

        if (next - self.duty).abs() > EPSILON {
            self.duty = next;
            self.last_change = now;
            self.write_pending = true;
        }

        self.write_pending.then_some(self.duty)
    }

    /// Report the outcome of writing the duty returned by [`step`](Self::step).
    /// A failed write degrades the zone and is retried on the next tick.
    pub fn record_write(&mut self, result: Result<()>) {
        match result {
            Ok(()) => self.write_pending = false,
            Err(err) => {
                self.write_pending = true;
                self.last_error = Some(err.to_string());
                if self.health == ZoneHealth::Ok {
                    self.health = ZoneHealth::Degraded;
                }
            }
        }
    }

    /// Pin the zone's duty until the request's TTL runs out.
    pub fn apply_override(&mut self, request: &OverrideRequest, now: Instant) {
        let expires_at = now.checked_add(request.ttl()).unwrap_or(now);
        let resume_duty = self.manual.map_or(self.duty, |m| m.resume_duty);
        self.manual = Some(ManualOverride {
            duty: request.duty.clamp(0.0, 1.0),
            expires_at,
            resume_duty,
        });
    }

    /// Drop any active override. Returns whether one was active.
    pub fn clear_override(&mut self) -> bool {
        self.release_override()
    }

    pub fn snapshot(&self, now: Instant) -> ZoneSnapshot {
        ZoneSnapshot {
            zone: self.zone,
            temperature: self.temperature,
            duty: self.duty,
            state: self.status(),
            phase: self.phase,
            health: self.health,
            consecutive_failures: self.consecutive_failures,
            override_remaining_secs: self
                .manual
                .map(|m| m.expires_at.saturating_duration_since(now).as_secs_f64()),
            secs_since_change: now.saturating_duration_since(self.last_change).as_secs_f64(),
            last_error: self.last_error.clone(),
            fan_count: self.fan_count,
            thermistor_count: self.thermistor_count,
        }
    }

    fn expire_override(&mut self, now: Instant) {
        if matches!(self.manual, Some(m) if m.expires_at <= now) {
            self.release_override();
        }
    }

    fn release_override(&mut self) -> bool {
        match self.manual.take() {
            Some(manual) => {
                self.released = Some(manual.resume_duty);
                true
            }
            None => false,
        }
    }

    fn record_reading(&mut self, celsius: f64) {
        self.temperature = Some(celsius);
        self.consecutive_failures = 0;
        self.health = ZoneHealth::Ok;
        self.last_error = None;

        let policy = &self.policy;
        self.entered_warming = false;
        self.phase = match self.phase {
            ThermalPhase::Idle | ThermalPhase::Cooling if celsius >= policy.rise_threshold_c => {
                self.entered_warming = true;
                ThermalPhase::Warming
            }
            ThermalPhase::Warming | ThermalPhase::Active if celsius < policy.fall_threshold_c => {
                ThermalPhase::Cooling
            }
            phase => phase,
        };
    }

    fn record_failure(&mut self, err: OrvError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.temperature = None;
        self.last_error = Some(err.to_string());
        self.health = if self.consecutive_failures >= self.limits.failure_threshold {
            ZoneHealth::Fault
        } else {
            ZoneHealth::Degraded
        };
    }

    fn floor(&self) -> f64 {
        if self.has_fans() {
            self.policy.min_duty
        } else {
            0.0
        }
    }

    fn automatic_duty(&mut self) -> f64 {
        let Some(celsius) = self.temperature else {
            return self.duty;
        };

        let floor = self.floor();
        let target = if celsius >= self.policy.safety_threshold_c {
            1.0
        } else {
            match self.phase {
                ThermalPhase::Idle | ThermalPhase::Cooling => floor,
                ThermalPhase::Warming | ThermalPhase::Active => {
                    self.curve.duty_for(celsius).clamp(0.0, 1.0).max(floor)
                }
            }
        };

        // The startup duty and a rise out of idle or cooling go straight to target;
        // changes within a phase are slew limited
        let jump = !self.settled || std::mem::take(&mut self.entered_warming);
        let next = if jump {
            target
        } else {
            self.approach(target, floor)
        };
        self.settled = true;

        self.phase = match self.phase {
            ThermalPhase::Warming if (target - next).abs() <= self.policy.deadband.max(EPSILON) => {
                ThermalPhase::Active
            }
            ThermalPhase::Cooling if next <= floor + EPSILON => ThermalPhase::Idle,
            phase => phase,
        };

        next
    }

    /// Move from the current duty towards `target`, honoring deadband and slew limits.
    fn approach(&self, target: f64, floor: f64) -> f64 {
        let delta = target - self.duty;
        if delta.abs() <= EPSILON {
            return target;
        }

        let settling = (target - floor).abs() <= EPSILON || (target - 1.0).abs() <= EPSILON;
        if delta.abs() < self.policy.deadband && !settling {
            return self.duty;
        }

        let step = delta.clamp(-self.policy.max_step, self.policy.max_step);
        (self.duty + step).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::curve::{CurvePoint, ThermalCurve};
    use std::time::Duration;

    fn controller(zone: Zone, fans: usize) -> (ZoneController, Instant) {
        let now = Instant::now();
        let ctl = ZoneController::new(zone, ZonePolicy::default(), fans, 1, ControlLimits::default(), now);
        (ctl, now)
    }

    /// Step and acknowledge the write, as the control loop does.
    fn tick(ctl: &mut ZoneController, reading: Result<f64>, now: Instant) -> Option<f64> {
        let written = ctl.step(reading, now);
        if written.is_some() {
            ctl.record_write(Ok(()));
        }
        written
    }

    fn timeout() -> Result<f64> {
        Err(OrvError::ReadTimeout("TMP0".to_string()))
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_hot_zone_reaches_active_duty_in_one_tick() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);
        assert_eq!(ctl.duty(), 1.0);

        let written = tick(&mut ctl, Ok(45.0), now).unwrap();
        assert!(approx(written, 0.7), "wrote {}", written);
        assert_eq!(ctl.phase(), ThermalPhase::Active);
        assert_eq!(ctl.status(), ZoneStatus::Active);

        // Cooling ramps back to the idle floor within a few ticks
        for i in 1..=5 {
            tick(&mut ctl, Ok(20.0), now + Duration::from_secs(i));
        }
        assert!(approx(ctl.duty(), 0.2), "duty {}", ctl.duty());
        assert_eq!(ctl.phase(), ThermalPhase::Idle);
    }

    #[test]
    fn test_cooling_is_slew_limited() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);
        tick(&mut ctl, Ok(45.0), now);

        let written = tick(&mut ctl, Ok(20.0), now).unwrap();
        assert!(approx(written, 0.45));
        assert_eq!(ctl.phase(), ThermalPhase::Cooling);
    }

    #[test]
    fn test_unit_slew_drops_to_floor_in_one_tick() {
        let now = Instant::now();
        let policy = ZonePolicy {
            max_step: 1.0,
            ..Default::default()
        };
        let mut ctl = ZoneController::new(Zone::IntakeLower, policy, 1, 1, ControlLimits::default(), now);

        tick(&mut ctl, Ok(45.0), now);
        let written = tick(&mut ctl, Ok(20.0), now).unwrap();
        assert!(approx(written, 0.2));
        assert_eq!(ctl.phase(), ThermalPhase::Idle);
    }

    #[test]
    fn test_hysteresis_band_does_not_chatter() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);
        tick(&mut ctl, Ok(20.0), now);
        assert!(approx(ctl.duty(), 0.2));

        // Between the thresholds an idle zone stays idle
        let mut writes = 0;
        for (i, temp) in [31.0, 34.0, 32.5, 34.9, 30.1, 33.0].iter().cycle().take(30).enumerate() {
            if tick(&mut ctl, Ok(*temp), now + Duration::from_secs(i as u64)).is_some() {
                writes += 1;
            }
        }
        assert_eq!(writes, 0);
        assert_eq!(ctl.phase(), ThermalPhase::Idle);

        // Crossing the rise threshold once changes the duty once
        let mut writes = 0;
        for (i, temp) in [36.0, 34.0].iter().cycle().take(20).enumerate() {
            if tick(&mut ctl, Ok(*temp), now + Duration::from_secs(100 + i as u64)).is_some() {
                writes += 1;
            }
        }
        assert_eq!(writes, 1);
        assert_eq!(ctl.phase(), ThermalPhase::Active);
    }

    #[test]
    fn test_three_failures_force_full_duty() {
        let (mut ctl, now) = controller(Zone::ExhaustLower, 2);
        tick(&mut ctl, Ok(40.0), now);
        let settled = ctl.duty();
        assert!(settled < 1.0);

        tick(&mut ctl, timeout(), now);
        assert_eq!(ctl.health(), ZoneHealth::Degraded);
        assert_eq!(ctl.duty(), settled);
        tick(&mut ctl, timeout(), now);
        assert_eq!(ctl.duty(), settled);

        let written = tick(&mut ctl, timeout(), now);
        assert_eq!(written, Some(1.0));
        assert_eq!(ctl.health(), ZoneHealth::Fault);
        assert_eq!(ctl.status(), ZoneStatus::Fault);

        for _ in 0..5 {
            tick(&mut ctl, timeout(), now);
            assert_eq!(ctl.duty(), 1.0);
        }

        // Recovery hands control back to the curve
        tick(&mut ctl, Ok(40.0), now);
        assert_eq!(ctl.health(), ZoneHealth::Ok);
        assert!(ctl.duty() < 1.0);
        assert_eq!(ctl.snapshot(now).consecutive_failures, 0);
    }

    #[test]
    fn test_fault_beats_override() {
        let (mut ctl, now) = controller(Zone::IntakeUpper, 1);
        let request = OverrideRequest::new(Zone::IntakeUpper, 0.3, 60.0).unwrap();
        ctl.apply_override(&request, now);

        for _ in 0..3 {
            tick(&mut ctl, timeout(), now);
        }
        assert_eq!(ctl.duty(), 1.0);
        assert_eq!(ctl.status(), ZoneStatus::Fault);
    }

    #[test]
    fn test_missing_sensor_degrades_without_fault() {
        let now = Instant::now();
        let mut ctl = ZoneController::new(
            Zone::ExhaustUpper,
            ZonePolicy::default(),
            1,
            0,
            ControlLimits::default(),
            now,
        );

        for _ in 0..10 {
            tick(&mut ctl, Err(OrvError::NoSensor(Zone::ExhaustUpper)), now);
        }
        assert_eq!(ctl.health(), ZoneHealth::Degraded);
        assert_eq!(ctl.duty(), 1.0);
        assert_eq!(ctl.snapshot(now).consecutive_failures, 0);
    }

    #[test]
    fn test_startup_duty_held_until_first_reading() {
        let now = Instant::now();
        let limits = ControlLimits {
            startup_duty: 0.6,
            ..Default::default()
        };
        let mut ctl = ZoneController::new(Zone::IntakeLower, ZonePolicy::default(), 1, 1, limits, now);

        // First tick always writes, even when holding
        assert_eq!(tick(&mut ctl, timeout(), now), Some(0.6));
        assert_eq!(tick(&mut ctl, timeout(), now), None);
        assert_eq!(ctl.duty(), 0.6);
    }

    #[test]
    fn test_override_expires_and_automatic_control_resumes() {
        let (mut ctl, t0) = controller(Zone::ExhaustUpper, 1);
        tick(&mut ctl, Ok(20.0), t0);
        assert!(approx(ctl.duty(), 0.2));

        let request = OverrideRequest::new(Zone::ExhaustUpper, 1.0, 30.0).unwrap();
        ctl.apply_override(&request, t0);

        assert_eq!(tick(&mut ctl, Ok(20.0), t0), Some(1.0));
        assert_eq!(ctl.status(), ZoneStatus::Override);

        let snapshot = ctl.snapshot(t0 + Duration::from_secs(10));
        assert!(approx(snapshot.override_remaining_secs.unwrap(), 20.0));

        tick(&mut ctl, Ok(20.0), t0 + Duration::from_secs(29));
        assert_eq!(ctl.duty(), 1.0);

        tick(&mut ctl, Ok(20.0), t0 + Duration::from_secs(30));
        assert!(ctl.duty() < 1.0);
        assert_eq!(ctl.status(), ZoneStatus::Idle);
        assert!(ctl.snapshot(t0 + Duration::from_secs(30)).override_remaining_secs.is_none());
    }

    #[test]
    fn test_settled_idle_zone_reaches_active_duty_in_one_tick() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);
        for i in 0..5 {
            tick(&mut ctl, Ok(20.0), now + Duration::from_secs(i));
        }
        assert!(approx(ctl.duty(), 0.2));
        assert_eq!(ctl.phase(), ThermalPhase::Idle);

        let written = tick(&mut ctl, Ok(45.0), now + Duration::from_secs(5)).unwrap();
        assert!(approx(written, 0.7), "wrote {}", written);
        assert_eq!(ctl.phase(), ThermalPhase::Active);

        // Within the phase the slew limit still applies
        let written = tick(&mut ctl, Ok(55.0), now + Duration::from_secs(6)).unwrap();
        assert!(approx(written, 0.95), "wrote {}", written);
    }

    #[test]
    fn test_expired_override_without_sensor_restores_prior_duty() {
        let t0 = Instant::now();
        let mut ctl = ZoneController::new(
            Zone::IntakeUpper,
            ZonePolicy::default(),
            1,
            0,
            ControlLimits::default(),
            t0,
        );
        let no_sensor = || Err(OrvError::NoSensor(Zone::IntakeUpper));
        assert_eq!(tick(&mut ctl, no_sensor(), t0), Some(1.0));

        let request = OverrideRequest::new(Zone::IntakeUpper, 0.0, 30.0).unwrap();
        ctl.apply_override(&request, t0);
        assert_eq!(tick(&mut ctl, no_sensor(), t0), Some(0.0));

        assert_eq!(tick(&mut ctl, no_sensor(), t0 + Duration::from_secs(31)), Some(1.0));
        for secs in [60, 3600, 86400] {
            tick(&mut ctl, no_sensor(), t0 + Duration::from_secs(secs));
            assert_eq!(ctl.duty(), 1.0);
            assert_eq!(ctl.status(), ZoneStatus::Degraded);
        }
    }

    #[test]
    fn test_override_ending_during_read_failure_restores_prior_duty() {
        let (mut ctl, t0) = controller(Zone::ExhaustLower, 1);
        tick(&mut ctl, Ok(20.0), t0);
        assert!(approx(ctl.duty(), 0.2));

        let request = OverrideRequest::new(Zone::ExhaustLower, 0.9, 30.0).unwrap();
        ctl.apply_override(&request, t0);
        tick(&mut ctl, Ok(20.0), t0);
        assert!(approx(ctl.duty(), 0.9));

        // A replacing override keeps the duty from before the first one
        let request = OverrideRequest::new(Zone::ExhaustLower, 0.6, 30.0).unwrap();
        ctl.apply_override(&request, t0 + Duration::from_secs(1));
        tick(&mut ctl, Ok(20.0), t0 + Duration::from_secs(1));
        assert!(approx(ctl.duty(), 0.6));

        assert!(ctl.clear_override());
        tick(&mut ctl, timeout(), t0 + Duration::from_secs(2));
        assert_eq!(ctl.health(), ZoneHealth::Degraded);
        assert!(approx(ctl.duty(), 0.2), "duty {}", ctl.duty());
    }

    #[test]
    fn test_clear_override() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);
        assert!(!ctl.clear_override());

        let request = OverrideRequest::new(Zone::IntakeLower, 0.5, 30.0).unwrap();
        ctl.apply_override(&request, now);
        assert!(ctl.clear_override());
        assert_eq!(ctl.status(), ZoneStatus::Idle);
    }

    #[test]
    fn test_failed_write_is_retried() {
        let (mut ctl, now) = controller(Zone::IntakeLower, 1);

        let written = ctl.step(Ok(20.0), now);
        assert!(written.is_some());
        ctl.record_write(Err(OrvError::WriteFailure {
            target: "PN1".to_string(),
            reason: "EIO".to_string(),
        }));
        assert_eq!(ctl.health(), ZoneHealth::Degraded);
        assert!(ctl.snapshot(now).last_error.unwrap().contains("PN1"));

        // Same duty is offered again even though nothing changed
        assert_eq!(ctl.step(Ok(20.0), now), written);
        ctl.record_write(Ok(()));
        assert_eq!(ctl.health(), ZoneHealth::Ok);
        assert_eq!(ctl.step(Ok(20.0), now), None);
    }

    #[test]
    fn test_safety_threshold_runs_full_duty() {
        let (mut ctl, now) = controller(Zone::ExhaustLower, 1);
        tick(&mut ctl, Ok(20.0), now);
        tick(&mut ctl, Ok(65.0), now);
        // 1.0 is reached without the deadband holding it back
        for _ in 0..4 {
            tick(&mut ctl, Ok(65.0), now);
        }
        assert!(approx(ctl.duty(), 1.0));
    }

    #[test]
    fn test_zone_without_fans_has_zero_floor() {
        let (mut ctl, now) = controller(Zone::ExhaustUpper, 0);
        assert_eq!(ctl.duty(), 0.0);
        tick(&mut ctl, Ok(20.0), now);
        assert_eq!(ctl.duty(), 0.0);
    }

    #[test]
    fn test_custom_curve() {
        #[derive(Debug)]
        struct Flat(f64);
        impl DutyCurve for Flat {
            fn duty_for(&self, _celsius: f64) -> f64 {
                self.0
            }
        }

        let (ctl, now) = controller(Zone::IntakeLower, 1);
        let mut ctl = ctl.with_curve(Arc::new(Flat(0.9)));
        tick(&mut ctl, Ok(40.0), now);
        assert!(approx(ctl.duty(), 0.9));

        let steep = ThermalCurve::new(vec![CurvePoint::new(35.0, 0.5), CurvePoint::new(36.0, 0.6)]);
        let (ctl, now) = controller(Zone::IntakeLower, 1);
        let mut ctl = ctl.with_curve(Arc::new(steep));
        tick(&mut ctl, Ok(40.0), now);
        assert!(approx(ctl.duty(), 0.6));
    }

    #[test]
    fn test_snapshot_contents() {
        let (mut ctl, now) = controller(Zone::IntakeUpper, 2);
        tick(&mut ctl, Ok(22.5), now);

        let snapshot = ctl.snapshot(now + Duration::from_secs(5));
        assert_eq!(snapshot.zone, Zone::IntakeUpper);
        assert_eq!(snapshot.temperature, Some(22.5));
        assert_eq!(snapshot.state, ZoneStatus::Idle);
        assert_eq!(snapshot.fan_count, 2);
        assert_eq!(snapshot.thermistor_count, 1);
        assert!(approx(snapshot.secs_since_change, 5.0));
        assert!(snapshot.last_error.is_none());
    }
}
