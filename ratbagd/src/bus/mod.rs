pub mod button;
pub mod device;
pub mod led;
pub mod manager;
pub mod profile;
pub mod resolution;

use tracing::warn;

use crate::control::ControlSender;
use crate::device::DeviceHandle;
use crate::error::RatbagError;

pub const ROOT_PATH: &str = "/org/freedesktop/ratbag1";

pub fn device_object_path(sysname: &str) -> String {
    format!("{ROOT_PATH}/device/{}", sanitize(sysname))
}

/// Object paths must be `[A-Za-z0-9_]` plus `/`; sysnames like
/// `hidraw0` already qualify, but guard against any future udev name
/// that doesn't.
fn sanitize(sysname: &str) -> String {
    sysname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn profile_object_path(device_path: &str, profile_index: u32) -> String {
    format!("{device_path}/p{profile_index}")
}

pub fn resolution_object_path(device_path: &str, profile_index: u32, res_index: u32) -> String {
    format!("{device_path}/p{profile_index}/r{res_index}")
}

pub fn button_object_path(device_path: &str, profile_index: u32, button_index: u32) -> String {
    format!("{device_path}/p{profile_index}/b{button_index}")
}

pub fn led_object_path(device_path: &str, profile_index: u32, led_index: u32) -> String {
    format!("{device_path}/p{profile_index}/l{led_index}")
}

/// Map the object-model error taxonomy onto `zbus::fdo::Error`. Bus
/// method return types can't carry `RatbagError` directly, so every
/// property setter and method funnels its `Result` through this.
pub fn to_fdo_error(err: RatbagError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{err} (code {})", err.as_wire_code()))
}

/// Register every bus object for a newly attached device: the device
/// object itself plus one Profile/Resolution/Button/Led object per
/// entity currently in its lattice. Returns the full list of paths
/// registered, in registration order, so `unregister_device` can tear
/// them down again.
pub async fn register_device(
    conn: &zbus::Connection,
    sysname: &str,
    handle: DeviceHandle,
    control: ControlSender,
) -> Vec<String> {
    let device_path = device_object_path(sysname);
    let object_server = conn.object_server();
    let mut paths = Vec::new();

    let device_obj = device::RatbagDevice::new(
        handle.clone(),
        sysname.to_string(),
        device_path.clone(),
        control.clone(),
    );
    if let Err(e) = object_server.at(device_path.as_str(), device_obj).await {
        warn!("failed to register device {sysname}: {e}");
        return paths;
    }
    paths.push(device_path.clone());

    let num_profiles = handle.read().await.profiles.len() as u32;
    for p in 0..num_profiles {
        let profile_path = profile_object_path(&device_path, p);
        let profile_obj =
            profile::RatbagProfile::new(handle.clone(), p, device_path.clone(), control.clone());
        if let Err(e) = object_server.at(profile_path.as_str(), profile_obj).await {
            warn!("failed to register profile {profile_path}: {e}");
        }
        paths.push(profile_path.clone());

        let (num_res, num_buttons, num_leds) = {
            let state = handle.read().await;
            let profile = &state.profiles[p as usize];
            (
                profile.resolutions.len() as u32,
                profile.buttons.len() as u32,
                profile.leds.len() as u32,
            )
        };

        for r in 0..num_res {
            let path = resolution_object_path(&device_path, p, r);
            let obj = resolution::RatbagResolution::new(handle.clone(), p, r, device_path.clone());
            if let Err(e) = object_server.at(path.as_str(), obj).await {
                warn!("failed to register resolution {path}: {e}");
            }
            paths.push(path);
        }

        for b in 0..num_buttons {
            let path = button_object_path(&device_path, p, b);
            let obj = button::RatbagButton::new(handle.clone(), p, b);
            if let Err(e) = object_server.at(path.as_str(), obj).await {
                warn!("failed to register button {path}: {e}");
            }
            paths.push(path);
        }

        for l in 0..num_leds {
            let path = led_object_path(&device_path, p, l);
            let obj = led::RatbagLed::new(handle.clone(), p, l);
            if let Err(e) = object_server.at(path.as_str(), obj).await {
                warn!("failed to register led {path}: {e}");
            }
            paths.push(path);
        }
    }

    paths
}

/// Unregister every object a prior `register_device` call published, in
/// reverse order (children before parents). Each path only ever hosts
/// one interface type, so the other three `remove::<T, _>` calls are
/// harmless no-ops.
pub async fn unregister_device(conn: &zbus::Connection, paths: &[String]) {
    let object_server = conn.object_server();
    for path in paths.iter().rev() {
        let _ = object_server.remove::<device::RatbagDevice, _>(path.as_str()).await;
        let _ = object_server.remove::<profile::RatbagProfile, _>(path.as_str()).await;
        let _ = object_server
            .remove::<resolution::RatbagResolution, _>(path.as_str())
            .await;
        let _ = object_server.remove::<button::RatbagButton, _>(path.as_str()).await;
        let _ = object_server.remove::<led::RatbagLed, _>(path.as_str()).await;
    }
}
