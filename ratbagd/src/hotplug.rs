/* Hot-plug source (C4): a udev monitor on the raw-HID subsystem, plus a
 * startup enumeration of devices already present, both folded into one
 * `DeviceAction` stream the reactor (C8) drains. */
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum DeviceAction {
    Add {
        sysname: String,
        devnode: String,
        name: String,
        bustype: u16,
        vid: u16,
        pid: u16,
    },
    Remove {
        sysname: String,
    },
}

/// Extracts `(bustype, vid, pid)` from a hidraw udev device's HID parent.
/// The hidraw node itself carries no `HID_ID`; it lives on the `hid`
/// subsystem ancestor in sysfs.
fn hid_id_of(device: &udev::Device) -> Option<(u16, u16, u16)> {
    let hid_parent = device.parent_with_subsystem("hid").ok().flatten()?;
    let raw = hid_parent.property_value("HID_ID")?.to_str()?;
    /* Format: "bustype:vendor:product", each a 4-digit hex field. */
    let mut parts = raw.split(':');
    let bustype = u16::from_str_radix(parts.next()?, 16).ok()?;
    let vid = u16::from_str_radix(parts.next()?, 16).ok()?;
    let pid = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some((bustype, vid, pid))
}

fn device_name_of(device: &udev::Device) -> String {
    device
        .parent_with_subsystem("hid")
        .ok()
        .flatten()
        .and_then(|p| p.property_value("HID_NAME").map(|v| v.to_string_lossy().into_owned()))
        .unwrap_or_else(|| device.sysname().to_string_lossy().into_owned())
}

fn to_add_action(device: &udev::Device) -> Option<DeviceAction> {
    let sysname = device.sysname().to_str()?.to_string();
    if !sysname.starts_with("hidraw") {
        return None;
    }
    let devnode = device.devnode()?.to_str()?.to_string();
    let (bustype, vid, pid) = hid_id_of(device)?;
    let name = device_name_of(device);
    Some(DeviceAction::Add {
        sysname,
        devnode,
        name,
        bustype,
        vid,
        pid,
    })
}

/// Enumerate already-attached hidraw devices and push one `Add` action
/// per device found, so devices present before the daemon starts aren't
/// missed.
fn enumerate_existing(tx: &mpsc::UnboundedSender<DeviceAction>) -> anyhow::Result<()> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("hidraw")?;
    for device in enumerator.scan_devices()? {
        if let Some(action) = to_add_action(&device) {
            let _ = tx.send(action);
        }
    }
    Ok(())
}

/// Spawn the udev monitor on a blocking thread (the `udev` crate's
/// `MonitorSocket` iterator blocks on `recv`, so it cannot run directly
/// on the async reactor) and return a channel the reactor selects on.
pub fn start() -> anyhow::Result<mpsc::UnboundedReceiver<DeviceAction>> {
    let (tx, rx) = mpsc::unbounded_channel();

    enumerate_existing(&tx)?;

    let monitor = udev::MonitorBuilder::new()?
        .match_subsystem("hidraw")?
        .listen()?;

    std::thread::spawn(move || {
        for event in monitor.iter() {
            let sysname = event.device().sysname().to_string_lossy().into_owned();
            if !sysname.starts_with("hidraw") {
                continue;
            }
            let action = match event.event_type() {
                udev::EventType::Add | udev::EventType::Bind => to_add_action(event.device()),
                udev::EventType::Remove | udev::EventType::Unbind => {
                    Some(DeviceAction::Remove { sysname: sysname.clone() })
                }
                _ => None,
            };
            if let Some(action) = action {
                debug!("udev event: {action:?}");
                if tx.send(action).is_err() {
                    /* Receiver dropped: daemon is shutting down. */
                    break;
                }
            }
        }
        warn!("udev monitor thread exiting");
    });

    Ok(rx)
}
