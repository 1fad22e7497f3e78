use crate::{config::ChannelSpec, error::ModelError};

/// One tracked scalar with its display placement.
#[derive(Debug, Clone)]
struct Channel {
    key: String,
    value: f32,
    slot: usize,
    unit: String,
}

/// Single source of truth for the values currently on screen.
///
/// Values start at the 0.0 sentinel and are only ever replaced by a
/// bit-for-bit different value. Callers use the `changed` result of
/// [`Environment::update`] to decide whether to trigger a redraw or publish:
/// an e-paper refresh is idempotent-safe but expensive, so suppression is a
/// battery contract rather than cosmetics.
#[derive(Debug, Clone)]
pub struct Environment {
    channels: Vec<Channel>,
}

impl Environment {
    pub fn new(specs: &[ChannelSpec]) -> Self {
        let channels = specs
            .iter()
            .map(|spec| Channel {
                key: spec.key.clone(),
                value: 0.0,
                slot: spec.slot,
                unit: spec.unit.clone(),
            })
            .collect();
        Self { channels }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.channels.iter().any(|channel| channel.key == key)
    }

    pub fn value(&self, key: &str) -> Result<f32, ModelError> {
        self.channel(key).map(|channel| channel.value)
    }

    /// Stores `value` only if it differs from the current value, and reports
    /// whether a change occurred.
    pub fn update(&mut self, key: &str, value: f32) -> Result<bool, ModelError> {
        let channel = self.channel_mut(key)?;
        if value.to_bits() == channel.value.to_bits() {
            return Ok(false);
        }
        channel.value = value;
        Ok(true)
    }

    /// `stored + step`, routed through [`Environment::update`] so locally
    /// originated changes get the same suppression as broker updates.
    pub fn increment(&mut self, key: &str, step: f32) -> Result<bool, ModelError> {
        let next = self.value(key)? + step;
        self.update(key, next)
    }

    pub fn decrement(&mut self, key: &str, step: f32) -> Result<bool, ModelError> {
        let next = self.value(key)? - step;
        self.update(key, next)
    }

    /// Rendered text and display slot for one channel.
    pub fn display_line(&self, key: &str) -> Result<(String, usize), ModelError> {
        let channel = self.channel(key)?;
        Ok((format!("{}{}", channel.value, channel.unit), channel.slot))
    }

    fn channel(&self, key: &str) -> Result<&Channel, ModelError> {
        self.channels
            .iter()
            .find(|channel| channel.key == key)
            .ok_or_else(|| ModelError::UnknownChannel(key.to_string()))
    }

    fn channel_mut(&mut self, key: &str) -> Result<&mut Channel, ModelError> {
        self.channels
            .iter_mut()
            .find(|channel| channel.key == key)
            .ok_or_else(|| ModelError::UnknownChannel(key.to_string()))
    }
}
