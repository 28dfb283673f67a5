/* Device registry (C3): the authoritative map from sysname to a live
 * device's state, reflecting the attached/detached/removed lifecycle
 * hot-plug events drive. Ordered by sysname so `Manager.Devices` listings
 * are stable between calls. */
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::device::DeviceHandle;
use crate::driver::{DeviceIo, Driver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLifecycle {
    /// Present and probed successfully; reachable over the bus.
    Attached,
    /// udev reported removal but the object hasn't been unpublished yet
    /// (in-flight commit is allowed to finish writing to a now-gone node
    /// and will simply fail with a `Device` error).
    Detached,
}

/// A device's bound protocol driver plus the transport it reads/writes
/// through. Held behind a mutex rather than run on the reactor thread
/// directly: commits are dispatched onto `tokio::spawn`ed tasks (C6) so
/// a slow hardware round-trip on one device never stalls the reactor's
/// `select!` loop or another device's poll tick.
pub struct DriverContext {
    pub driver: Box<dyn Driver>,
    pub io: DeviceIo,
}

impl DriverContext {
    pub fn new(driver: Box<dyn Driver>, io: DeviceIo) -> Self {
        Self { driver, io }
    }
}

struct Entry {
    handle: DeviceHandle,
    state: DeviceLifecycle,
    driver_ctx: Option<Arc<Mutex<DriverContext>>>,
}

/// Sysname-keyed registry of attached devices. All operations run on the
/// single reactor thread, so no internal locking is needed — the registry
/// itself is not shared across tasks, only the `DeviceHandle`s it hands
/// out are.
#[derive(Default)]
pub struct Registry {
    devices: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    /// Registers a newly probed device. Calling this twice for the same
    /// sysname without an intervening `remove` is a programmer error: the
    /// hot-plug source (C4) guarantees add/remove pairing per sysname.
    pub fn insert(
        &mut self,
        sysname: impl Into<String>,
        handle: DeviceHandle,
        driver_ctx: Option<Arc<Mutex<DriverContext>>>,
    ) {
        let sysname = sysname.into();
        assert!(
            !self.devices.contains_key(&sysname),
            "duplicate sysname registered: {sysname}"
        );
        self.devices.insert(
            sysname,
            Entry {
                handle,
                state: DeviceLifecycle::Attached,
                driver_ctx,
            },
        );
    }

    /// Marks a device detached without removing it from the map, so any
    /// bus object paths still resolve (reads succeed, writes fail) until
    /// `remove` is called once the driver's teardown completes.
    pub fn mark_detached(&mut self, sysname: &str) {
        if let Some(entry) = self.devices.get_mut(sysname) {
            entry.state = DeviceLifecycle::Detached;
        }
    }

    /// Drops the registry's reference. The device's `Arc` may still be
    /// held elsewhere (a bus call in flight), in which case the state
    /// outlives the registry entry — this is the refcounting behaviour
    /// spec §3's Ownership paragraph describes.
    pub fn remove(&mut self, sysname: &str) -> Option<DeviceHandle> {
        self.devices.remove(sysname).map(|entry| entry.handle)
    }

    pub fn get(&self, sysname: &str) -> Option<DeviceHandle> {
        self.devices.get(sysname).map(|entry| entry.handle.clone())
    }

    pub fn driver_ctx(&self, sysname: &str) -> Option<Arc<Mutex<DriverContext>>> {
        self.devices.get(sysname).and_then(|e| e.driver_ctx.clone())
    }

    pub fn lifecycle(&self, sysname: &str) -> Option<DeviceLifecycle> {
        self.devices.get(sysname).map(|entry| entry.state)
    }

    pub fn contains(&self, sysname: &str) -> bool {
        self.devices.contains_key(sysname)
    }

    /// Ordered sysnames, for `Manager.Devices` listings.
    pub fn sysnames(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceHandle)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), &v.handle))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{new_device_handle, BusId, DeviceState, DeviceType};

    fn handle(sysname: &str) -> DeviceHandle {
        new_device_handle(DeviceState::init_profiles(
            sysname,
            0,
            0,
            0,
            BusId(3),
            "n",
            DeviceType::Mouse,
            1,
            1,
            0,
            0,
            &[800],
        ))
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut reg = Registry::new();
        reg.insert("hidraw0", handle("hidraw0"), None);
        assert!(reg.contains("hidraw0"));
        assert_eq!(reg.lifecycle("hidraw0"), Some(DeviceLifecycle::Attached));
        assert!(reg.remove("hidraw0").is_some());
        assert!(!reg.contains("hidraw0"));
    }

    #[test]
    fn sysnames_are_ordered() {
        let mut reg = Registry::new();
        reg.insert("hidraw2", handle("hidraw2"), None);
        reg.insert("hidraw0", handle("hidraw0"), None);
        reg.insert("hidraw1", handle("hidraw1"), None);
        let names: Vec<_> = reg.sysnames().collect();
        assert_eq!(names, ["hidraw0", "hidraw1", "hidraw2"]);
    }

    #[test]
    #[should_panic(expected = "duplicate sysname")]
    fn duplicate_insert_panics() {
        let mut reg = Registry::new();
        reg.insert("hidraw0", handle("hidraw0"), None);
        reg.insert("hidraw0", handle("hidraw0"), None);
    }

    #[test]
    fn detach_keeps_entry_reachable() {
        let mut reg = Registry::new();
        reg.insert("hidraw0", handle("hidraw0"), None);
        reg.mark_detached("hidraw0");
        assert_eq!(reg.lifecycle("hidraw0"), Some(DeviceLifecycle::Detached));
        assert!(reg.get("hidraw0").is_some());
    }

    #[test]
    fn handle_outlives_registry_removal() {
        let mut reg = Registry::new();
        let h = handle("hidraw0");
        reg.insert("hidraw0", h.clone(), None);
        let strong_before = std::sync::Arc::strong_count(&h);
        let removed = reg.remove("hidraw0").unwrap();
        assert_eq!(std::sync::Arc::strong_count(&removed), strong_before);
    }
}
