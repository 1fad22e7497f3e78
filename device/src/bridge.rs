use rumqttc::QoS;

use tempdisplay_common::{ButtonAction, ButtonBinding, Environment, ModelError};

use crate::hardware::ButtonSample;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPublish {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
}

/// Turns one tick's button edges into model mutations and outbound
/// publishes. Setpoint nudges are non-critical, so publishes go out at
/// QoS 0.
#[derive(Debug)]
pub struct InputBridge {
    bindings: Vec<ButtonBinding>,
    step: f32,
}

impl InputBridge {
    pub fn new(bindings: Vec<ButtonBinding>, step: f32) -> Self {
        Self { bindings, step }
    }

    /// Returns the channel keys that changed (for redraw) and the publishes
    /// to send. The new value goes out as bare decimal text. Publishes get
    /// the same suppression as redraws: a press that leaves the stored
    /// value untouched emits nothing.
    pub fn apply(
        &self,
        sample: ButtonSample,
        model: &mut Environment,
    ) -> Result<(Vec<String>, Vec<OutboundPublish>), ModelError> {
        let mut changed = Vec::new();
        let mut outbound = Vec::new();

        for binding in &self.bindings {
            if !sample.is_pressed(binding.button) {
                continue;
            }

            let changed_now = match binding.action {
                ButtonAction::Increase => model.increment(&binding.key, self.step)?,
                ButtonAction::Decrease => model.decrement(&binding.key, self.step)?,
            };
            if !changed_now {
                continue;
            }
            changed.push(binding.key.clone());

            let value = model.value(&binding.key)?;
            outbound.push(OutboundPublish {
                topic: binding.topic.clone(),
                payload: value.to_string(),
                qos: QoS::AtMostOnce,
            });
        }

        Ok((changed, outbound))
    }
}
