use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, topics};

/// One tracked scalar: its channel key, the display slot it renders into,
/// and the unit label appended to the rendered text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub key: String,
    pub slot: usize,
    pub unit: String,
}

/// An inbound subscription and how its payloads decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopicSpec {
    /// Bare decimal ASCII text feeding one channel.
    Scalar { topic: String, key: String },
    /// JSON object; `(field, channel key)` pairs extracted in order.
    Json {
        topic: String,
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Button {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Increase,
    Decrease,
}

/// Maps a physical button edge to a model mutation and the outbound topic
/// the resulting value is published to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonBinding {
    pub button: Button,
    pub action: ButtonAction,
    pub key: String,
    pub topic: String,
}

/// The per-variant parameterization. The source hardware shipped five
/// near-duplicate firmware images differing only in topic names, unit
/// labels, and channel counts; all of that lives here instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub channels: Vec<ChannelSpec>,
    pub subscriptions: Vec<TopicSpec>,
    pub buttons: Vec<ButtonBinding>,
    pub step: f32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelSpec {
                    key: topics::CHANNEL_CURRENT.to_string(),
                    slot: 0,
                    unit: "°F".to_string(),
                },
                ChannelSpec {
                    key: topics::CHANNEL_DESIRED.to_string(),
                    slot: 1,
                    unit: "°F".to_string(),
                },
            ],
            subscriptions: vec![
                TopicSpec::Scalar {
                    topic: topics::TOPIC_TEMPERATURE.to_string(),
                    key: topics::CHANNEL_CURRENT.to_string(),
                },
                TopicSpec::Json {
                    topic: topics::TOPIC_THERMOSTAT_STATUS.to_string(),
                    fields: vec![
                        (
                            topics::CHANNEL_CURRENT.to_string(),
                            topics::CHANNEL_CURRENT.to_string(),
                        ),
                        (
                            topics::CHANNEL_DESIRED.to_string(),
                            topics::CHANNEL_DESIRED.to_string(),
                        ),
                    ],
                },
            ],
            buttons: vec![
                ButtonBinding {
                    button: Button::A,
                    action: ButtonAction::Increase,
                    key: topics::CHANNEL_DESIRED.to_string(),
                    topic: topics::TOPIC_DESIRED_SETPOINT.to_string(),
                },
                ButtonBinding {
                    button: Button::B,
                    action: ButtonAction::Decrease,
                    key: topics::CHANNEL_DESIRED.to_string(),
                    topic: topics::TOPIC_DESIRED_SETPOINT.to_string(),
                },
            ],
            step: 0.2,
        }
    }
}

/// Broker endpoint and credentials. Supplied before the supervisor starts;
/// a missing host, port, or Wi-Fi network name is startup-fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub wifi_ssid: String,
    pub keep_alive_secs: u64,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = require_var("MQTT_HOST")?;
        let port_raw = require_var("MQTT_PORT")?;
        let port = port_raw
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port_raw))?;
        let wifi_ssid = require_var("WIFI_SSID")?;

        Ok(Self {
            host,
            port,
            client_id: std::env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "tempdisplay".to_string()),
            username: std::env::var("MQTT_USER").unwrap_or_default(),
            password: std::env::var("MQTT_PASS").unwrap_or_default(),
            wifi_ssid,
            // The panel is slow to change and the link is flaky; a long
            // keep-alive avoids waking the radio for pings.
            keep_alive_secs: 75,
        })
    }
}

/// Timing knobs for the supervisor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Upper bound on one read/dispatch cycle; keeps the loop reaching the
    /// button-sampling step even under a silent broker.
    pub read_bound_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Cooldown before the whole supervisor restarts after an unanticipated
    /// failure.
    pub restart_cooldown_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            read_bound_ms: 1_000,
            connect_timeout_ms: 30_000,
            reconnect_timeout_ms: 30_000,
            backoff_initial_ms: 250,
            backoff_max_ms: 30_000,
            restart_cooldown_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub profile: DeviceProfile,
    #[serde(default)]
    pub run: LoopConfig,
}

impl DeviceConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            broker: BrokerConfig::from_env()?,
            profile: DeviceProfile::default(),
            run: LoopConfig::default(),
        })
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}
