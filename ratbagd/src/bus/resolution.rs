/* The org.freedesktop.ratbag1.Resolution interface: one DPI preset within
 * a profile. */
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Value};

use crate::bus::to_fdo_error;
use crate::device::{cap, Dpi, DeviceHandle, ResolutionCaps};
use crate::error::RatbagError;

pub struct RatbagResolution {
    handle: DeviceHandle,
    profile_index: u32,
    res_index: u32,
    device_path: String,
}

impl RatbagResolution {
    pub fn new(handle: DeviceHandle, profile_index: u32, res_index: u32, device_path: String) -> Self {
        Self { handle, profile_index, res_index, device_path }
    }
}

fn caps_to_codes(caps: ResolutionCaps) -> Vec<u32> {
    let mut codes = Vec::new();
    if caps.contains(ResolutionCaps::SEPARATE_XY) {
        codes.push(cap::RESOLUTION_SEPARATE_XY);
    }
    if caps.contains(ResolutionCaps::CAN_DISABLE) {
        codes.push(cap::RESOLUTION_CAN_DISABLE);
    }
    codes
}

fn fallback_owned_value() -> OwnedValue {
    OwnedValue::from(0u32)
}

#[interface(name = "org.freedesktop.ratbag1.Resolution")]
impl RatbagResolution {
    /// Zero-based resolution index (constant).
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.res_index
    }

    #[zbus(property)]
    async fn capabilities(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| caps_to_codes(r.caps))
            .unwrap_or_default()
    }

    #[zbus(property)]
    async fn is_active(&self) -> bool {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    #[zbus(property)]
    async fn is_default(&self) -> bool {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.is_default)
            .unwrap_or(false)
    }

    #[zbus(property)]
    async fn is_disabled(&self) -> bool {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.is_disabled)
            .unwrap_or(false)
    }

    #[zbus(property)]
    async fn set_is_disabled(&self, disabled: bool, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state
                .set_resolution_disabled(self.profile_index, self.res_index, disabled)
                .map_err(to_fdo_error)?;
        }
        let _ = self.is_disabled_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn is_dpi_shift_target(&self) -> bool {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.is_dpi_shift_target)
            .unwrap_or(false)
    }

    /// DPI value as a variant: either a plain `u32` or a `(u32, u32)`
    /// tuple for devices with `ResolutionCaps::SEPARATE_XY`.
    #[zbus(property)]
    async fn resolution(&self) -> OwnedValue {
        let state = self.handle.read().await;
        let Ok(res) = state.resolution(self.profile_index, self.res_index) else {
            return fallback_owned_value();
        };
        match res.dpi {
            Dpi::Unified(val) => OwnedValue::try_from(Value::from(val)).unwrap_or_else(|_| fallback_owned_value()),
            Dpi::Separate { x, y } => {
                OwnedValue::try_from(Value::from((x, y))).unwrap_or_else(|_| fallback_owned_value())
            }
        }
    }

    #[zbus(property)]
    async fn set_resolution(&self, value: OwnedValue, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        let inner: Value<'_> = value.into();
        let dpi = match &inner {
            Value::U32(val) => Dpi::Unified(*val),
            Value::Structure(s) => match s.fields() {
                [Value::U32(x), Value::U32(y)] => Dpi::Separate { x: *x, y: *y },
                _ => return Err(to_fdo_error(RatbagError::InvalidValue)),
            },
            _ => return Err(to_fdo_error(RatbagError::InvalidValue)),
        };
        {
            let mut state = self.handle.write().await;
            state
                .set_resolution_dpi(self.profile_index, self.res_index, dpi)
                .map_err(to_fdo_error)?;
        }
        let _ = self.resolution_changed(emitter).await;
        Ok(())
    }

    /// Permitted DPI values (constant; empty means any value is allowed).
    #[zbus(property)]
    async fn resolutions(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.allowed_dpi.clone())
            .unwrap_or_default()
    }

    /// Highest permitted DPI value (0 if `resolutions` is empty, meaning
    /// any value is allowed).
    #[zbus(property)]
    async fn max_dpi(&self) -> u32 {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.allowed_dpi.iter().copied().max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Lowest permitted DPI value (0 if `resolutions` is empty, meaning
    /// any value is allowed).
    #[zbus(property)]
    async fn min_dpi(&self) -> u32 {
        let state = self.handle.read().await;
        state
            .resolution(self.profile_index, self.res_index)
            .map(|r| r.allowed_dpi.iter().copied().min().unwrap_or(0))
            .unwrap_or(0)
    }

    async fn set_active(
        &self,
        conn: &zbus::Connection,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let previous = {
            let state = self.handle.read().await;
            let profile = state.profile(self.profile_index).map_err(to_fdo_error)?;
            profile
                .resolutions
                .iter()
                .find(|r| r.is_active && r.index != self.res_index)
                .map(|r| r.index)
        };
        {
            let mut state = self.handle.write().await;
            state
                .set_resolution_active(self.profile_index, self.res_index)
                .map_err(to_fdo_error)?;
        }
        let _ = self.is_active_changed(emitter).await;
        if let Some(sibling_index) = previous {
            let path =
                crate::bus::resolution_object_path(&self.device_path, self.profile_index, sibling_index);
            if let Ok(iface_ref) = conn.object_server().interface::<_, RatbagResolution>(path.as_str()).await {
                let _ = iface_ref.get().await.is_active_changed(iface_ref.signal_emitter()).await;
            }
        }
        Ok(())
    }

    async fn set_default(
        &self,
        conn: &zbus::Connection,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let previous = {
            let state = self.handle.read().await;
            let profile = state.profile(self.profile_index).map_err(to_fdo_error)?;
            profile
                .resolutions
                .iter()
                .find(|r| r.is_default && r.index != self.res_index)
                .map(|r| r.index)
        };
        {
            let mut state = self.handle.write().await;
            state
                .set_resolution_default(self.profile_index, self.res_index)
                .map_err(to_fdo_error)?;
        }
        let _ = self.is_default_changed(emitter).await;
        if let Some(sibling_index) = previous {
            let path =
                crate::bus::resolution_object_path(&self.device_path, self.profile_index, sibling_index);
            if let Ok(iface_ref) = conn.object_server().interface::<_, RatbagResolution>(path.as_str()).await {
                let _ = iface_ref.get().await.is_default_changed(iface_ref.signal_emitter()).await;
            }
        }
        Ok(())
    }

    async fn set_dpi_shift_target(
        &self,
        conn: &zbus::Connection,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let previous = {
            let state = self.handle.read().await;
            let profile = state.profile(self.profile_index).map_err(to_fdo_error)?;
            profile
                .resolutions
                .iter()
                .find(|r| r.is_dpi_shift_target && r.index != self.res_index)
                .map(|r| r.index)
        };
        {
            let mut state = self.handle.write().await;
            state
                .set_resolution_dpi_shift_target(self.profile_index, self.res_index)
                .map_err(to_fdo_error)?;
        }
        let _ = self.is_dpi_shift_target_changed(emitter).await;
        if let Some(sibling_index) = previous {
            let path =
                crate::bus::resolution_object_path(&self.device_path, self.profile_index, sibling_index);
            if let Ok(iface_ref) = conn.object_server().interface::<_, RatbagResolution>(path.as_str()).await {
                let _ = iface_ref.get().await.is_dpi_shift_target_changed(iface_ref.signal_emitter()).await;
            }
        }
        Ok(())
    }
}
