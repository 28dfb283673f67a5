/* The reactor (C8): the single task that owns the registry, the zbus
 * object server, and every driver transport. Everything else — bus
 * method bodies, the commit scheduler, the poll loop, the hot-plug
 * source — only ever hands this task a message; nothing outside this
 * file touches the registry or a `DriverContext` directly. */
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::control::{self, ControlRequest};
use crate::device::{new_device_handle, DeviceHandle};
use crate::device_database::{self, BusType, DeviceDb};
use crate::driver::{create_driver, DeviceIo};
use crate::hotplug::{self, DeviceAction};
use crate::poll::{poll_device, PollTimer, POLL_INTERVAL};
use crate::registry::{DriverContext, Registry};

/// Everything the reactor needs to assemble before it can run.
pub struct Reactor {
    conn: zbus::Connection,
    registry: Arc<RwLock<Registry>>,
    control_tx: control::ControlSender,
    control_rx: control::ControlReceiver,
    device_db: DeviceDb,
}

impl Reactor {
    /// Connect to the bus, claim the well-known name, and publish the
    /// `Manager` root object. Returns `Err` if the name is already taken
    /// (another `ratbagd` is running) so `main` can report that cleanly.
    pub async fn new(data_dir: &std::path::Path) -> anyhow::Result<Self> {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let (control_tx, control_rx) = control::channel();
        let device_db = device_database::load_device_database(data_dir);

        let manager = crate::bus::manager::RatbagManager::new(registry.clone(), control_tx.clone());
        let conn = zbus::connection::Builder::system()?
            .name("org.freedesktop.ratbag1")?
            .serve_at(crate::bus::ROOT_PATH, manager)?
            .build()
            .await?;

        Ok(Self {
            conn,
            registry,
            control_tx,
            control_rx,
            device_db,
        })
    }

    /// Drive the reactor until SIGTERM/SIGINT or every channel closes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut hotplug_rx = hotplug::start()?;
        let mut poll_timer = PollTimer::new(POLL_INTERVAL);
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                action = hotplug_rx.recv() => {
                    match action {
                        Some(DeviceAction::Add { sysname, devnode, name, bustype, vid, pid }) => {
                            self.handle_add(sysname, devnode, name, bustype, vid, pid).await;
                        }
                        Some(DeviceAction::Remove { sysname }) => {
                            self.handle_remove(sysname).await;
                        }
                        None => {
                            warn!("hot-plug source closed, continuing without it");
                            break;
                        }
                    }
                }
                request = self.control_rx.recv() => {
                    match request {
                        Some(req) => self.handle_control(req).await,
                        None => {
                            warn!("control channel closed unexpectedly");
                            break;
                        }
                    }
                }
                _ = poll_timer.tick() => {
                    self.poll_all().await;
                }
            }
        }

        Ok(())
    }

    async fn handle_add(&mut self, sysname: String, devnode: String, name: String, bustype: u16, vid: u16, pid: u16) {
        if self.registry.read().await.contains(&sysname) {
            return;
        }

        let bus = BusType::from_u16(bustype);
        let Some(entry) = self.device_db.get(&(bus, vid, pid)).cloned() else {
            info!("{sysname}: no matching .device entry for {bustype:04x}:{vid:04x}:{pid:04x}, ignoring");
            return;
        };

        let Some(mut driver) = create_driver(&entry.driver) else {
            warn!("{sysname}: driver '{}' not implemented", entry.driver);
            return;
        };

        let mut io = match DeviceIo::open(&PathBuf::from(&devnode)).await {
            Ok(io) => io,
            Err(err) => {
                warn!("{sysname}: failed to open {devnode}: {err:#}");
                return;
            }
        };

        let mut state = match driver.probe(&mut io).await {
            Ok(state) => state,
            Err(err) => {
                warn!("{sysname}: probe failed: {err:#}");
                return;
            }
        };
        if let Err(err) = state.check_invariants() {
            warn!("{sysname}: probed state violates invariants: {err}");
            return;
        }

        state.sysname = sysname.clone();
        if state.name.is_empty() {
            state.name = if name.is_empty() { entry.name.clone() } else { name };
        }

        let handle = new_device_handle(state);
        let driver_ctx = Arc::new(Mutex::new(DriverContext::new(driver, io)));
        self.registry.write().await.insert(sysname.clone(), handle.clone(), Some(driver_ctx));

        let paths = crate::bus::register_device(&self.conn, &sysname, handle, self.control_tx.clone()).await;
        info!("{sysname}: attached ({} objects published)", paths.len());
        notify_devices_changed(&self.conn).await;
    }

    async fn handle_remove(&mut self, sysname: String) {
        self.registry.write().await.mark_detached(&sysname);
        let device_path = crate::bus::device_object_path(&sysname);

        let paths = {
            let state = self.registry.read().await;
            if let Some(handle) = state.get(&sysname) {
                let profiles = handle.read().await.profiles.len() as u32;
                let mut paths = vec![device_path.clone()];
                for p in 0..profiles {
                    paths.push(crate::bus::profile_object_path(&device_path, p));
                    let (n_res, n_btn, n_led) = {
                        let s = handle.read().await;
                        let pr = &s.profiles[p as usize];
                        (pr.resolutions.len() as u32, pr.buttons.len() as u32, pr.leds.len() as u32)
                    };
                    for r in 0..n_res {
                        paths.push(crate::bus::resolution_object_path(&device_path, p, r));
                    }
                    for b in 0..n_btn {
                        paths.push(crate::bus::button_object_path(&device_path, p, b));
                    }
                    for l in 0..n_led {
                        paths.push(crate::bus::led_object_path(&device_path, p, l));
                    }
                }
                paths
            } else {
                Vec::new()
            }
        };

        crate::bus::unregister_device(&self.conn, &paths).await;
        self.registry.write().await.remove(&sysname);
        info!("{sysname}: detached");
        notify_devices_changed(&self.conn).await;
    }

    async fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Commit { sysname } => {
                let Some(handle) = self.registry.read().await.get(&sysname) else {
                    return;
                };
                let Some(driver_ctx) = self.registry.read().await.driver_ctx(&sysname) else {
                    return;
                };
                let conn = self.conn.clone();
                tokio::spawn(async move {
                    if crate::commit::run_commit(sysname.clone(), handle.clone(), driver_ctx).await {
                        emit_profile_dirty_cleared(&conn, &sysname, &handle).await;
                    } else {
                        warn!("{sysname}: commit failed, clients should resync");
                        emit_resync(&conn, &sysname, &handle).await;
                    }
                });
            }

            #[cfg(feature = "dev-hooks")]
            ControlRequest::LoadTestDevice { json, reply } => {
                let result = self.load_test_device(json).await;
                let _ = reply.send(result);
            }

            #[cfg(feature = "dev-hooks")]
            ControlRequest::ResetTestDevice { reply } => {
                self.reset_test_devices().await;
                let _ = reply.send(());
            }
        }
    }

    #[cfg(feature = "dev-hooks")]
    async fn load_test_device(&mut self, json: String) -> Result<i32, crate::error::RatbagError> {
        use crate::driver::test_driver;

        let spec = test_driver::parse_json(&json).map_err(|_| crate::error::RatbagError::InvalidValue)?;

        let mut n = 0usize;
        let sysname = loop {
            let candidate = format!("test{n}");
            if !self.registry.read().await.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };

        let state = test_driver::build_device_state(&sysname, spec).map_err(|_| crate::error::RatbagError::InvalidValue)?;
        let handle = new_device_handle(state);
        let io = DeviceIo::open(std::path::Path::new("/dev/null"))
            .await
            .map_err(|_| crate::error::RatbagError::System)?;
        let driver_ctx = Arc::new(Mutex::new(DriverContext::new(Box::new(test_driver::TestDriver::new()), io)));
        self.registry.write().await.insert(sysname.clone(), handle.clone(), Some(driver_ctx));

        crate::bus::register_device(&self.conn, &sysname, handle, self.control_tx.clone()).await;
        notify_devices_changed(&self.conn).await;
        Ok(0)
    }

    #[cfg(feature = "dev-hooks")]
    async fn reset_test_devices(&mut self) {
        let test_sysnames: Vec<String> = {
            let registry = self.registry.read().await;
            registry.sysnames().filter(|s| s.starts_with("test")).map(String::from).collect()
        };
        for sysname in test_sysnames {
            self.handle_remove(sysname).await;
        }
    }

    async fn poll_all(&mut self) {
        let targets: Vec<(String, DeviceHandle, Arc<Mutex<DriverContext>>)> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .filter_map(|(sysname, handle)| {
                    registry
                        .driver_ctx(sysname)
                        .map(|ctx| (sysname.to_string(), handle.clone(), ctx))
                })
                .collect()
        };

        for (sysname, handle, driver_ctx) in targets {
            let conn = self.conn.clone();
            tokio::spawn(async move {
                if poll_device(sysname.clone(), handle.clone(), driver_ctx).await {
                    emit_resync(&conn, &sysname, &handle).await;
                }
            });
        }
    }
}

/// Tell clients the `Manager.Devices` property changed. zbus generates a
/// `devices_changed` helper for any `#[zbus(property)]` getter named
/// `devices`; calling it emits the standard `PropertiesChanged` signal.
async fn notify_devices_changed(conn: &zbus::Connection) {
    let Ok(iface_ref) = conn
        .object_server()
        .interface::<_, crate::bus::manager::RatbagManager>(crate::bus::ROOT_PATH)
        .await
    else {
        return;
    };
    let _ = iface_ref.get().await.devices_changed(iface_ref.signal_emitter()).await;
}

/// Emit `Device.Resync` after a failed commit, or after the poll loop
/// detects an out-of-band change, so clients re-read state instead of
/// trusting their last write (§4.6 item 4, §4.7). Re-reading happens by
/// re-emitting every mutable child property's changed signal, in addition
/// to the bare `Resync` signal itself.
async fn emit_resync(conn: &zbus::Connection, sysname: &str, handle: &DeviceHandle) {
    let device_path = crate::bus::device_object_path(sysname);

    if let Ok(iface_ref) = conn
        .object_server()
        .interface::<_, crate::bus::device::RatbagDevice>(device_path.as_str())
        .await
    {
        let _ = crate::bus::device::RatbagDevice::resync(iface_ref.signal_emitter()).await;
    }

    let profile_shape: Vec<(u32, u32, u32, u32)> = {
        let state = handle.read().await;
        state
            .profiles
            .iter()
            .map(|p| (p.index, p.resolutions.len() as u32, p.buttons.len() as u32, p.leds.len() as u32))
            .collect()
    };

    for (p, n_res, n_btn, n_led) in profile_shape {
        let profile_path = crate::bus::profile_object_path(&device_path, p);
        if let Ok(iface_ref) = conn
            .object_server()
            .interface::<_, crate::bus::profile::RatbagProfile>(profile_path.as_str())
            .await
        {
            let profile = iface_ref.get().await;
            let emitter = iface_ref.signal_emitter();
            let _ = profile.name_changed(emitter).await;
            let _ = profile.disabled_changed(emitter).await;
            let _ = profile.is_active_changed(emitter).await;
            let _ = profile.is_dirty_changed(emitter).await;
            let _ = profile.report_rate_changed(emitter).await;
            let _ = profile.angle_snapping_changed(emitter).await;
            let _ = profile.debounce_changed(emitter).await;
        }

        for r in 0..n_res {
            let path = crate::bus::resolution_object_path(&device_path, p, r);
            if let Ok(iface_ref) = conn
                .object_server()
                .interface::<_, crate::bus::resolution::RatbagResolution>(path.as_str())
                .await
            {
                let res = iface_ref.get().await;
                let emitter = iface_ref.signal_emitter();
                let _ = res.is_active_changed(emitter).await;
                let _ = res.is_default_changed(emitter).await;
                let _ = res.is_disabled_changed(emitter).await;
                let _ = res.is_dpi_shift_target_changed(emitter).await;
                let _ = res.resolution_changed(emitter).await;
            }
        }

        for b in 0..n_btn {
            let path = crate::bus::button_object_path(&device_path, p, b);
            if let Ok(iface_ref) =
                conn.object_server().interface::<_, crate::bus::button::RatbagButton>(path.as_str()).await
            {
                let _ = iface_ref.get().await.mapping_changed(iface_ref.signal_emitter()).await;
            }
        }

        for l in 0..n_led {
            let path = crate::bus::led_object_path(&device_path, p, l);
            if let Ok(iface_ref) =
                conn.object_server().interface::<_, crate::bus::led::RatbagLed>(path.as_str()).await
            {
                let led = iface_ref.get().await;
                let emitter = iface_ref.signal_emitter();
                let _ = led.mode_changed(emitter).await;
                let _ = led.color_changed(emitter).await;
                let _ = led.effect_duration_changed(emitter).await;
                let _ = led.brightness_changed(emitter).await;
            }
        }
    }
}

/// Emit `IsDirty` changed for every profile after a successful commit
/// clears the subtree's dirty flags (§4.6 item 3).
async fn emit_profile_dirty_cleared(conn: &zbus::Connection, sysname: &str, handle: &DeviceHandle) {
    let device_path = crate::bus::device_object_path(sysname);
    let profile_indices: Vec<u32> = {
        let state = handle.read().await;
        state.profiles.iter().map(|p| p.index).collect()
    };
    for p in profile_indices {
        let profile_path = crate::bus::profile_object_path(&device_path, p);
        if let Ok(iface_ref) = conn
            .object_server()
            .interface::<_, crate::bus::profile::RatbagProfile>(profile_path.as_str())
            .await
        {
            let _ = iface_ref.get().await.is_dirty_changed(iface_ref.signal_emitter()).await;
        }
    }
}
