pub const TOPIC_TEMPERATURE: &str = "perupino/garrett/temperatureF";
pub const TOPIC_THERMOSTAT_STATUS: &str = "perupino/garrett/fan_thermostat/status_json";
pub const TOPIC_DESIRED_SETPOINT: &str = "perupino/garrett/fan_thermostat/desired";

pub const CHANNEL_CURRENT: &str = "current";
pub const CHANNEL_DESIRED: &str = "desired";
