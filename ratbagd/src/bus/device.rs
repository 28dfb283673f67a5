/* The org.freedesktop.ratbag1.Device interface: the root object for one
 * physical device, exposing identity and its `Commit` entry point. */
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::ObjectPath;

use crate::control::{ControlRequest, ControlSender};
use crate::device::DeviceHandle;

pub struct RatbagDevice {
    handle: DeviceHandle,
    sysname: String,
    device_path: String,
    control: ControlSender,
}

impl RatbagDevice {
    pub fn new(handle: DeviceHandle, sysname: String, device_path: String, control: ControlSender) -> Self {
        Self {
            handle,
            sysname,
            device_path,
            control,
        }
    }
}

#[interface(name = "org.freedesktop.ratbag1.Device")]
impl RatbagDevice {
    #[zbus(property)]
    async fn model(&self) -> String {
        let state = self.handle.read().await;
        format!(
            "{}:{:04x}:{:04x}:{}",
            state.bustype.0, state.vendor, state.product, state.version
        )
    }

    #[zbus(property)]
    async fn name(&self) -> String {
        self.handle.read().await.name.clone()
    }

    #[zbus(property)]
    async fn firmware_version(&self) -> String {
        self.handle.read().await.firmware_version.clone()
    }

    /// 0 = unspecified, 1 = other, 2 = mouse, 3 = keyboard.
    #[zbus(property)]
    async fn device_type(&self) -> u32 {
        self.handle.read().await.device_type as u32
    }

    #[zbus(property)]
    async fn profiles(&self) -> Vec<ObjectPath<'static>> {
        let state = self.handle.read().await;
        (0..state.profiles.len() as u32)
            .filter_map(|i| ObjectPath::try_from(format!("{}/p{}", self.device_path, i)).ok())
            .map(|p| p.into_owned())
            .collect()
    }

    /// Schedule a deferred write of every dirty entity to hardware and
    /// return immediately — the actual hardware round-trip happens on a
    /// background task (C6). Clients poll `IsDirty` or wait for the
    /// matching `PropertiesChanged`/`Resync` signal to learn the outcome.
    async fn commit(&self) -> zbus::fdo::Result<()> {
        self.control
            .send(ControlRequest::Commit {
                sysname: self.sysname.clone(),
            })
            .map_err(|_| zbus::fdo::Error::Failed("reactor is shutting down".into()))
    }

    /// Emitted after a failed commit: tells clients to re-read the
    /// device's state rather than assume their write landed.
    #[zbus(signal)]
    pub async fn resync(signal_emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}
