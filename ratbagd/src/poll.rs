/* Poll loop (C7): every tick, ask each attached device's driver which
 * resolution is currently active — the user may have switched DPI with
 * an on-device button — and reconcile the object model. */
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::device::DeviceHandle;
use crate::registry::DriverContext;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Re-arms itself off `last_tick + interval` rather than `now + interval`,
/// so ticks don't drift later with every iteration's processing time.
pub struct PollTimer {
    interval: Duration,
    next_tick: Instant,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_tick: Instant::now() + interval,
        }
    }

    pub async fn tick(&mut self) {
        tokio::time::sleep_until(self.next_tick).await;
        self.next_tick += self.interval;
    }
}

/// One poll pass over a single device. Spawned per device so a slow or
/// wedged hidraw node can't delay the next tick for every other device.
pub async fn poll_device(sysname: String, handle: DeviceHandle, driver_ctx: Arc<Mutex<DriverContext>>) -> bool {
    let active_profile = {
        let state = handle.read().await;
        match state.profiles.iter().find(|p| p.is_active) {
            Some(p) => p.index,
            None => return false,
        }
    };

    let mut ctx = driver_ctx.lock().await;
    let active_res = match ctx.driver.refresh_active_resolution(&mut ctx.io, active_profile).await {
        Ok(idx) => idx,
        Err(err) => {
            warn!("poll failed for {sysname}: {err:#}");
            return false;
        }
    };
    drop(ctx);

    let changed = handle.write().await.apply_active_resolution(active_profile, active_res);
    if changed {
        debug!("{sysname}: active resolution changed to {active_res} via poll");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_advances_by_fixed_interval() {
        let mut timer = PollTimer::new(Duration::from_millis(10));
        let first = timer.next_tick;
        timer.tick().await;
        assert_eq!(timer.next_tick, first + Duration::from_millis(10));
    }
}
