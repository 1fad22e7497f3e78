use thiserror::Error;
use tracing::{debug, info};

use tempdisplay_common::Button;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const WHITE: Rgb = Rgb(0xFF, 0xFF, 0xFF);
pub const RED: Rgb = Rgb(0xFF, 0x00, 0x00);
pub const OFF: Rgb = Rgb(0x00, 0x00, 0x00);

#[derive(Debug, Error)]
#[error("display error: {0}")]
pub struct DisplayError(pub String);

#[derive(Debug, Error)]
#[error("indicator error: {0}")]
pub struct IndicatorError(pub String);

/// The e-paper panel, reduced to the one call the loop needs.
/// `auto_refresh = false` batches slot updates ahead of a single physical
/// refresh.
pub trait DisplayPort {
    fn set_text(&mut self, text: &str, slot: usize, auto_refresh: bool)
        -> Result<(), DisplayError>;

    /// Best-effort resource release on the device-reset path.
    fn release(&mut self);
}

/// Per-pixel status lights. Cosmetic: callers log and swallow failures.
pub trait IndicatorPort {
    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), IndicatorError>;

    fn release(&mut self);
}

/// Debounced edge state for each button, sampled once per tick and never
/// stored beyond it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonSample {
    pub pressed: [bool; 4],
}

impl ButtonSample {
    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed[button as usize]
    }
}

pub trait ButtonPort {
    fn sample(&mut self) -> ButtonSample;
}

// Host implementations below. Hardware integration point: replace these
// with the e-paper panel, NeoPixel, and GPIO drivers on device targets.

#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplayPort for LogDisplay {
    fn set_text(&mut self, text: &str, slot: usize, auto_refresh: bool)
        -> Result<(), DisplayError> {
        info!(slot, auto_refresh, "display: {text}");
        Ok(())
    }

    fn release(&mut self) {
        debug!("display released");
    }
}

#[derive(Debug, Default)]
pub struct LogIndicator;

impl IndicatorPort for LogIndicator {
    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), IndicatorError> {
        debug!(index, "indicator: #{:02x}{:02x}{:02x}", color.0, color.1, color.2);
        Ok(())
    }

    fn release(&mut self) {
        debug!("indicator released");
    }
}

/// The host build has no GPIO to poll; every sample reads as released.
#[derive(Debug, Default)]
pub struct NoButtons;

impl ButtonPort for NoButtons {
    fn sample(&mut self) -> ButtonSample {
        ButtonSample::default()
    }
}
