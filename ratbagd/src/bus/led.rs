/* The org.freedesktop.ratbag1.Led interface: one LED within a profile. */
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::bus::to_fdo_error;
use crate::device::{Color, DeviceHandle, LedMode};
use crate::error::RatbagError;

pub struct RatbagLed {
    handle: DeviceHandle,
    profile_index: u32,
    led_index: u32,
}

impl RatbagLed {
    pub fn new(handle: DeviceHandle, profile_index: u32, led_index: u32) -> Self {
        Self { handle, profile_index, led_index }
    }
}

#[interface(name = "org.freedesktop.ratbag1.Led")]
impl RatbagLed {
    /// Zero-based LED index (constant).
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.led_index
    }

    #[zbus(property)]
    async fn mode(&self) -> u32 {
        let state = self.handle.read().await;
        state
            .led(self.profile_index, self.led_index)
            .map(|l| l.mode as u32)
            .unwrap_or(0)
    }

    #[zbus(property)]
    async fn set_mode(&self, mode: u32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        let mode = LedMode::from_u32(mode).ok_or(RatbagError::InvalidValue).map_err(to_fdo_error)?;
        {
            let mut state = self.handle.write().await;
            state.set_led_mode(self.profile_index, self.led_index, mode).map_err(to_fdo_error)?;
        }
        let _ = self.mode_changed(emitter).await;
        Ok(())
    }

    /// Supported LED modes (constant).
    #[zbus(property)]
    async fn modes(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        let Ok(led) = state.led(self.profile_index, self.led_index) else {
            return Vec::new();
        };
        [LedMode::Off, LedMode::On, LedMode::Cycle, LedMode::Breathing]
            .into_iter()
            .filter(|m| led.supported_modes.contains(m.as_cap()))
            .map(|m| m as u32)
            .collect()
    }

    #[zbus(property)]
    async fn color(&self) -> (u32, u32, u32) {
        let state = self.handle.read().await;
        let c = state
            .led(self.profile_index, self.led_index)
            .map(|l| l.color)
            .unwrap_or_default();
        (c.red, c.green, c.blue)
    }

    #[zbus(property)]
    async fn set_color(&self, color: (u32, u32, u32), emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        let color = Color::new(color.0, color.1, color.2).map_err(to_fdo_error)?;
        {
            let mut state = self.handle.write().await;
            state.set_led_color(self.profile_index, self.led_index, color).map_err(to_fdo_error)?;
        }
        let _ = self.color_changed(emitter).await;
        Ok(())
    }

    /// Color depth: 0 = monochrome, 1 = RGB888, 2 = RGB111.
    #[zbus(property)]
    async fn color_depth(&self) -> u32 {
        let state = self.handle.read().await;
        match state.led(self.profile_index, self.led_index).map(|l| l.color_depth) {
            Ok(crate::device::ColorDepth::Mono) => 0,
            Ok(crate::device::ColorDepth::Rgb888) => 1,
            Ok(crate::device::ColorDepth::Rgb111) => 2,
            Err(_) => 0,
        }
    }

    #[zbus(property)]
    async fn effect_duration(&self) -> u32 {
        let state = self.handle.read().await;
        state
            .led(self.profile_index, self.led_index)
            .map(|l| l.effect_duration)
            .unwrap_or(0)
    }

    #[zbus(property)]
    async fn set_effect_duration(&self, duration: u32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state
                .set_led_effect_duration(self.profile_index, self.led_index, duration)
                .map_err(to_fdo_error)?;
        }
        let _ = self.effect_duration_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn brightness(&self) -> u32 {
        let state = self.handle.read().await;
        state
            .led(self.profile_index, self.led_index)
            .map(|l| l.brightness as u32)
            .unwrap_or(0)
    }

    #[zbus(property)]
    async fn set_brightness(&self, brightness: u32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        let brightness: u8 = brightness.try_into().map_err(|_| to_fdo_error(RatbagError::InvalidValue))?;
        {
            let mut state = self.handle.write().await;
            state
                .set_led_brightness(self.profile_index, self.led_index, brightness)
                .map_err(to_fdo_error)?;
        }
        let _ = self.brightness_changed(emitter).await;
        Ok(())
    }
}
