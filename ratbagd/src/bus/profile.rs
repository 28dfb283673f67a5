/* The org.freedesktop.ratbag1.Profile interface: one of a device's
 * configurable profiles, containing resolutions, buttons, and LEDs. */
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::ObjectPath;

use crate::bus::to_fdo_error;
use crate::control::ControlSender;
use crate::device::DeviceHandle;

pub struct RatbagProfile {
    handle: DeviceHandle,
    profile_index: u32,
    device_path: String,
    #[allow(dead_code)]
    control: ControlSender,
}

impl RatbagProfile {
    pub fn new(handle: DeviceHandle, profile_index: u32, device_path: String, control: ControlSender) -> Self {
        Self { handle, profile_index, device_path, control }
    }
}

#[interface(name = "org.freedesktop.ratbag1.Profile")]
impl RatbagProfile {
    /// Zero-based profile index (constant).
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.profile_index
    }

    /// Profile name (read-write). Empty string means it can't be renamed.
    #[zbus(property)]
    async fn name(&self) -> String {
        let state = self.handle.read().await;
        state
            .profile(self.profile_index)
            .ok()
            .and_then(|p| p.name.clone())
            .unwrap_or_default()
    }

    #[zbus(property)]
    async fn set_name(&self, name: String, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state.set_profile_name(self.profile_index, name).map_err(to_fdo_error)?;
        }
        let _ = self.name_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn disabled(&self) -> bool {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| !p.is_enabled).unwrap_or(false)
    }

    #[zbus(property)]
    async fn set_disabled(&self, disabled: bool, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state
                .set_profile_disabled(self.profile_index, disabled)
                .map_err(to_fdo_error)?;
        }
        let _ = self.disabled_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn is_active(&self) -> bool {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| p.is_active).unwrap_or(false)
    }

    #[zbus(property)]
    async fn is_dirty(&self) -> bool {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| p.dirty.any()).unwrap_or(false)
    }

    #[zbus(property)]
    async fn resolutions(&self) -> Vec<ObjectPath<'static>> {
        let state = self.handle.read().await;
        let Ok(profile) = state.profile(self.profile_index) else {
            return Vec::new();
        };
        profile
            .resolutions
            .iter()
            .filter_map(|r| {
                ObjectPath::try_from(crate::bus::resolution_object_path(
                    &self.device_path,
                    self.profile_index,
                    r.index,
                ))
                .ok()
                .map(|p| p.into_owned())
            })
            .collect()
    }

    #[zbus(property)]
    async fn buttons(&self) -> Vec<ObjectPath<'static>> {
        let state = self.handle.read().await;
        let Ok(profile) = state.profile(self.profile_index) else {
            return Vec::new();
        };
        profile
            .buttons
            .iter()
            .filter_map(|b| {
                ObjectPath::try_from(crate::bus::button_object_path(
                    &self.device_path,
                    self.profile_index,
                    b.index,
                ))
                .ok()
                .map(|p| p.into_owned())
            })
            .collect()
    }

    #[zbus(property)]
    async fn leds(&self) -> Vec<ObjectPath<'static>> {
        let state = self.handle.read().await;
        let Ok(profile) = state.profile(self.profile_index) else {
            return Vec::new();
        };
        profile
            .leds
            .iter()
            .filter_map(|l| {
                ObjectPath::try_from(crate::bus::led_object_path(&self.device_path, self.profile_index, l.index))
                    .ok()
                    .map(|p| p.into_owned())
            })
            .collect()
    }

    /// -1 = unsupported, 0 = off, 1 = on.
    #[zbus(property)]
    async fn angle_snapping(&self) -> i32 {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| p.angle_snap).unwrap_or(-1)
    }

    #[zbus(property)]
    async fn set_angle_snapping(&self, value: i32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state
                .set_profile_angle_snapping(self.profile_index, value)
                .map_err(to_fdo_error)?;
        }
        let _ = self.angle_snapping_changed(emitter).await;
        Ok(())
    }

    /// Button debounce time in ms (-1 = unsupported).
    #[zbus(property)]
    async fn debounce(&self) -> i32 {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| p.debounce).unwrap_or(-1)
    }

    #[zbus(property)]
    async fn set_debounce(&self, value: i32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state.set_profile_debounce(self.profile_index, value).map_err(to_fdo_error)?;
        }
        let _ = self.debounce_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn debounces(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        state
            .profile(self.profile_index)
            .map(|p| p.allowed_debounce.clone())
            .unwrap_or_default()
    }

    #[zbus(property)]
    async fn report_rate(&self) -> u32 {
        let state = self.handle.read().await;
        state.profile(self.profile_index).map(|p| p.report_rate).unwrap_or(0)
    }

    #[zbus(property)]
    async fn set_report_rate(&self, rate: u32, emitter: &SignalEmitter<'_>) -> zbus::fdo::Result<()> {
        {
            let mut state = self.handle.write().await;
            state
                .set_profile_report_rate(self.profile_index, rate)
                .map_err(to_fdo_error)?;
        }
        let _ = self.report_rate_changed(emitter).await;
        Ok(())
    }

    #[zbus(property)]
    async fn report_rates(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        state
            .profile(self.profile_index)
            .map(|p| p.allowed_rates.clone())
            .unwrap_or_default()
    }

    /// Make this the active profile, deactivating all siblings. Takes
    /// effect on the next `Commit`.
    async fn set_active(
        &self,
        conn: &zbus::Connection,
        emitter: &SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let previously_active = {
            let state = self.handle.read().await;
            let profile = state.profile(self.profile_index).map_err(to_fdo_error)?;
            if profile.is_active {
                return Ok(());
            }
            state.profiles.iter().find(|p| p.is_active).map(|p| p.index)
        };

        {
            let mut state = self.handle.write().await;
            state.set_profile_active(self.profile_index).map_err(to_fdo_error)?;
        }

        let _ = self.is_active_changed(emitter).await;
        if let Some(prev_index) = previously_active {
            let path = crate::bus::profile_object_path(&self.device_path, prev_index);
            if let Ok(iface_ref) = conn.object_server().interface::<_, RatbagProfile>(path.as_str()).await {
                let _ = iface_ref.get().await.is_active_changed(iface_ref.signal_emitter()).await;
            }
        }
        Ok(())
    }
}
