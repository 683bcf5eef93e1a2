//! MQTT adapter with Home Assistant discovery
//!
//! Topics, with `{id}` the configured device id and `{zone}` a lowercase zone name:
//!
//! - `{id}/status/online`: `online`, or `offline` via the last will
//! - `{id}/temperature/{zone}`: mean °C, or `unavailable`
//! - `{id}/fan/{zone}/state`: `{"power": duty}`
//! - `{id}/fan/{zone}/set`: duty `0.0`-`1.0`, applied as a timed override
//! - `{id}/zone/{zone}/status`: control state (`idle`, `active`, `fault`, ...)
//!
//! Like the HTTP API, the adapter only reads snapshots and queues overrides.

use crate::control::ControlHandle;
use orv_core::config::MqttConfig;
use orv_core::{OrvError, OverrideRequest, PcbRevision, Result, Zone, ZoneSnapshot};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

fn availability_topic(device_id: &str) -> String {
    format!("{}/status/online", device_id)
}

fn temperature_topic(device_id: &str, zone: Zone) -> String {
    format!("{}/temperature/{}", device_id, zone.slug())
}

fn fan_topic(device_id: &str, zone: Zone, leaf: &str) -> String {
    format!("{}/fan/{}/{}", device_id, zone.slug(), leaf)
}

fn status_topic(device_id: &str, zone: Zone) -> String {
    format!("{}/zone/{}/status", device_id, zone.slug())
}

/// Zone addressed by a `{id}/fan/{zone}/set` topic.
fn parse_set_topic(device_id: &str, topic: &str) -> Option<Zone> {
    topic
        .strip_prefix(device_id)?
        .strip_prefix("/fan/")?
        .strip_suffix("/set")?
        .parse()
        .ok()
}

#[derive(Deserialize)]
struct PowerPayload {
    power: f64,
}

/// Duty from a set command: a bare number or `{"power": <number>}`.
fn parse_power(payload: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    text.parse::<f64>()
        .ok()
        .or_else(|| serde_json::from_str::<PowerPayload>(text).ok().map(|p| p.power))
}

/// Home Assistant discovery configs: a temperature sensor per zone with thermistors
/// and a fan power number per zone with fans.
fn discovery_messages(
    device_id: &str,
    revision: PcbRevision,
    zones: &[ZoneSnapshot],
) -> Vec<(String, Value)> {
    let device = json!({
        "identifiers": [format!("open_rack_vent_{}", device_id)],
        "manufacturer": "OpenRackVent",
        "model": format!("ORV: {}", revision),
        "name": "Open Rack Vent",
    });
    let availability = availability_topic(device_id);
    let mut messages = Vec::new();

    for snapshot in zones {
        let slug = snapshot.zone.slug();

        if snapshot.thermistor_count > 0 {
            let unique_id = format!("{}_temperature", slug);
            messages.push((
                format!("homeassistant/sensor/{}/config", unique_id),
                json!({
                    "name": format!("ORV Temperature {}", slug),
                    "state_topic": temperature_topic(device_id, snapshot.zone),
                    "unique_id": unique_id,
                    "device_class": "temperature",
                    "unit_of_measurement": "°C",
                    "device": device,
                    "availability_topic": availability,
                    "force_update": true,
                }),
            ));
        }

        if snapshot.fan_count > 0 {
            let unique_id = format!("{}_fan", slug);
            messages.push((
                format!("homeassistant/number/{}/config", unique_id),
                json!({
                    "name": format!("ORV Fan Power {}", slug),
                    "state_topic": fan_topic(device_id, snapshot.zone, "state"),
                    "command_topic": fan_topic(device_id, snapshot.zone, "set"),
                    "unique_id": unique_id,
                    "min": 0,
                    "max": 1,
                    "step": 0.01,
                    "device": device,
                    "availability_topic": availability,
                    "value_template": "{{ value_json.power }}",
                }),
            ));
        }
    }

    messages
}

/// Periodic state publications for one zone.
fn state_messages(device_id: &str, snapshot: &ZoneSnapshot) -> Vec<(String, String)> {
    let zone = snapshot.zone;
    let mut messages = Vec::with_capacity(3);

    if snapshot.thermistor_count > 0 {
        let payload = match snapshot.temperature {
            Some(celsius) => format!("{:.2}", celsius),
            None => "unavailable".to_string(),
        };
        messages.push((temperature_topic(device_id, zone), payload));
    }
    if snapshot.fan_count > 0 {
        messages.push((
            fan_topic(device_id, zone, "state"),
            json!({ "power": snapshot.duty }).to_string(),
        ));
    }
    messages.push((status_topic(device_id, zone), snapshot.state.as_str().to_string()));

    messages
}

/// MQTT front end over the control loop
pub(crate) struct MqttAdapter {
    config: MqttConfig,
    revision: PcbRevision,
    control: ControlHandle,
}

impl MqttAdapter {
    pub fn new(config: MqttConfig, revision: PcbRevision, control: ControlHandle) -> Self {
        Self {
            config,
            revision,
            control,
        }
    }

    fn options(&self) -> MqttOptions {
        let id = &self.config.device_id;
        let mut options =
            MqttOptions::new(format!("{}_controller", id), &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            availability_topic(id),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(username) = &self.config.username {
            options.set_credentials(
                username,
                self.config.password.as_deref().unwrap_or_default(),
            );
        }
        options
    }

    /// Serve until `shutdown` flips, reconnecting to the broker as needed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MQTT adapter connecting to {}:{} as '{}'",
            self.config.host, self.config.port, self.config.device_id
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(), 64);
        let mut publish_timer =
            tokio::time::interval(Duration::from_secs(self.config.publish_interval_secs.max(1)));

        while !*shutdown.borrow() {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connect(&client).await,
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.on_message(&client, &publish.topic, &publish.payload).await
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
                _ = publish_timer.tick() => self.publish_state(&client).await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.disconnect(&client, &mut eventloop).await;
        info!("MQTT adapter stopped");
    }

    async fn on_connect(&self, client: &AsyncClient) {
        let id = &self.config.device_id;
        info!("MQTT connected");

        publish(client, availability_topic(id), true, "online");
        if let Err(e) = client.try_subscribe(format!("{}/fan/+/set", id), QoS::AtLeastOnce) {
            warn!("MQTT subscribe failed: {}", e);
        }

        let zones = self.control.snapshots().await;
        for (topic, payload) in discovery_messages(id, self.revision, &zones) {
            publish(client, topic, true, payload.to_string());
        }
    }

    async fn on_message(&self, client: &AsyncClient, topic: &str, payload: &[u8]) {
        let id = &self.config.device_id;
        let Some(zone) = parse_set_topic(id, topic) else {
            debug!("Ignoring MQTT message on {}", topic);
            return;
        };
        let Some(power) = parse_power(payload) else {
            warn!(
                "Invalid fan power on {}: {:?}",
                topic,
                String::from_utf8_lossy(payload)
            );
            return;
        };

        match self.submit_set(zone, power).await {
            Ok(()) => {
                info!("MQTT override for {}: {:.2}", zone, power);
                publish(
                    client,
                    fan_topic(id, zone, "state"),
                    true,
                    json!({ "power": power }).to_string(),
                );
            }
            Err(e) => warn!("Rejected MQTT set for {}: {}", zone, e),
        }
    }

    /// Queue a set command as a timed override. Zones without fans reject it.
    async fn submit_set(&self, zone: Zone, power: f64) -> Result<()> {
        let has_fans = self
            .control
            .snapshot(zone)
            .await
            .is_some_and(|snapshot| snapshot.fan_count > 0);
        if !has_fans {
            return Err(OrvError::InvalidInput(format!(
                "{} has no fans to override",
                zone
            )));
        }

        let request = OverrideRequest::new(zone, power, self.config.override_ttl_secs)?;
        self.control.submit_override(request)
    }

    async fn publish_state(&self, client: &AsyncClient) {
        let id = &self.config.device_id;
        for snapshot in self.control.snapshots().await {
            for (topic, payload) in state_messages(id, &snapshot) {
                publish(client, topic, true, payload);
            }
        }
    }

    async fn disconnect(&self, client: &AsyncClient, eventloop: &mut rumqttc::EventLoop) {
        publish(client, availability_topic(&self.config.device_id), true, "offline");
        if client.try_disconnect().is_err() {
            return;
        }

        // Flush the queued requests until the disconnect goes out
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(1), flush).await.is_err() {
            debug!("MQTT disconnect did not flush in time");
        }
    }
}

/// Queue a publication without waiting; dropped with a warning when the queue is full.
fn publish(client: &AsyncClient, topic: String, retain: bool, payload: impl Into<Vec<u8>>) {
    if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, retain, payload) {
        warn!("MQTT publish to {} failed: {}", topic, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use orv_core::{ThermalPhase, ZoneHealth, ZoneStatus};

    fn snapshot(zone: Zone, fans: usize, thermistors: usize) -> ZoneSnapshot {
        ZoneSnapshot {
            zone,
            temperature: Some(31.25),
            duty: 0.45,
            state: ZoneStatus::Warming,
            phase: ThermalPhase::Warming,
            health: ZoneHealth::Ok,
            consecutive_failures: 0,
            override_remaining_secs: None,
            secs_since_change: 2.0,
            last_error: None,
            fan_count: fans,
            thermistor_count: thermistors,
        }
    }

    #[test]
    fn test_parse_set_topic() {
        assert_eq!(
            parse_set_topic("orv", "orv/fan/intake_lower/set"),
            Some(Zone::IntakeLower)
        );
        assert_eq!(
            parse_set_topic("rack/a", "rack/a/fan/EXHAUST_UPPER/set"),
            Some(Zone::ExhaustUpper)
        );
        assert_eq!(parse_set_topic("orv", "orv/fan/intake_lower/state"), None);
        assert_eq!(parse_set_topic("orv", "other/fan/intake_lower/set"), None);
        assert_eq!(parse_set_topic("orv", "orv/fan/middle/set"), None);
    }

    #[test]
    fn test_parse_power() {
        assert_eq!(parse_power(b"0.75"), Some(0.75));
        assert_eq!(parse_power(b" 1 \n"), Some(1.0));
        assert_eq!(parse_power(br#"{"power": 0.3}"#), Some(0.3));
        assert_eq!(parse_power(b"fast"), None);
        assert_eq!(parse_power(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_discovery_messages() {
        let zones = [
            snapshot(Zone::IntakeLower, 2, 1),
            snapshot(Zone::IntakeUpper, 0, 0),
            snapshot(Zone::ExhaustUpper, 0, 1),
        ];
        let messages = discovery_messages("orv", PcbRevision::V100, &zones);
        let topics: Vec<&str> = messages.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            [
                "homeassistant/sensor/intake_lower_temperature/config",
                "homeassistant/number/intake_lower_fan/config",
                "homeassistant/sensor/exhaust_upper_temperature/config",
            ]
        );

        let number = &messages[1].1;
        assert_eq!(number["command_topic"], "orv/fan/intake_lower/set");
        assert_eq!(number["state_topic"], "orv/fan/intake_lower/state");
        assert_eq!(number["availability_topic"], "orv/status/online");
        assert_eq!(number["device"]["model"], "ORV: v1.0.0");

        let sensor = &messages[0].1;
        assert_eq!(sensor["state_topic"], "orv/temperature/intake_lower");
        assert_eq!(sensor["device_class"], "temperature");
    }

    #[test]
    fn test_state_messages() {
        let messages = state_messages("orv", &snapshot(Zone::IntakeLower, 1, 1));
        assert_eq!(
            messages,
            [
                ("orv/temperature/intake_lower".to_string(), "31.25".to_string()),
                ("orv/fan/intake_lower/state".to_string(), r#"{"power":0.45}"#.to_string()),
                ("orv/zone/intake_lower/status".to_string(), "warming".to_string()),
            ]
        );
    }

    #[test]
    fn test_failed_read_publishes_unavailable() {
        let mut failed = snapshot(Zone::ExhaustLower, 0, 2);
        failed.temperature = None;
        failed.state = ZoneStatus::Fault;

        let messages = state_messages("orv", &failed);
        assert_eq!(messages[0].1, "unavailable");
        assert_eq!(messages[1].1, "fault");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_set_command_needs_fans() {
        let mut app = TestApp::new();
        let adapter = MqttAdapter::new(MqttConfig::default(), PcbRevision::V100, app.handle());

        let err = adapter.submit_set(Zone::ExhaustLower, 1.0).await.unwrap_err();
        assert!(matches!(err, OrvError::InvalidInput(_)));

        adapter.submit_set(Zone::ExhaustUpper, 0.9).await.unwrap();
        assert!(adapter.submit_set(Zone::ExhaustUpper, 1.5).await.is_err());

        app.tick().await;
        let snapshot = app.handle().snapshot(Zone::ExhaustUpper).await.unwrap();
        assert_eq!(snapshot.state, ZoneStatus::Override);
        assert_eq!(snapshot.duty, 0.9);
    }
}
