/* The org.freedesktop.ratbag1.Manager interface: the entry point clients
 * (Piper, ratbagctl) use to discover connected devices. */
use std::sync::Arc;

#[cfg(feature = "dev-hooks")]
use tokio::sync::oneshot;
use tokio::sync::RwLock;
use zbus::interface;

use crate::control::ControlSender;
use crate::registry::Registry;

/// DBus API version. Kept at the value the original C daemon shipped so
/// existing clients' version checks keep passing.
pub const API_VERSION: i32 = 2;

pub struct RatbagManager {
    registry: Arc<RwLock<Registry>>,
    #[allow(dead_code)]
    control: ControlSender,
}

impl RatbagManager {
    pub fn new(registry: Arc<RwLock<Registry>>, control: ControlSender) -> Self {
        Self { registry, control }
    }
}

#[interface(name = "org.freedesktop.ratbag1.Manager")]
impl RatbagManager {
    #[zbus(property)]
    async fn api_version(&self) -> i32 {
        API_VERSION
    }

    #[zbus(property)]
    async fn devices(&self) -> Vec<zbus::zvariant::ObjectPath<'static>> {
        let registry = self.registry.read().await;
        registry
            .sysnames()
            .filter_map(|s| {
                zbus::zvariant::ObjectPath::try_from(crate::bus::device_object_path(s))
                    .ok()
                    .map(|p| p.into_owned())
            })
            .collect()
    }

    /// Parse `json` as a synthetic device descriptor and register it as
    /// if hot-plugged. Only present in `dev-hooks` builds; real clients
    /// never see this method. Returns a status code (0 on success).
    #[cfg(feature = "dev-hooks")]
    async fn load_test_device(&self, json: String) -> zbus::fdo::Result<i32> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(crate::control::ControlRequest::LoadTestDevice { json, reply: reply_tx })
            .map_err(|_| zbus::fdo::Error::Failed("reactor is shutting down".into()))?;
        match reply_rx.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(err)) => Err(zbus::fdo::Error::Failed(err.to_string())),
            Err(_) => Err(zbus::fdo::Error::Failed("reactor dropped the request".into())),
        }
    }

    /// Remove every synthetic test device. `dev-hooks` only.
    #[cfg(feature = "dev-hooks")]
    async fn reset_test_device(&self) -> zbus::fdo::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(crate::control::ControlRequest::ResetTestDevice { reply: reply_tx })
            .map_err(|_| zbus::fdo::Error::Failed("reactor is shutting down".into()))?;
        reply_rx
            .await
            .map_err(|_| zbus::fdo::Error::Failed("reactor dropped the request".into()))
    }
}
