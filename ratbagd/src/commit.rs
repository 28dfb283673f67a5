/* Commit scheduler (C6): turns a `ControlRequest::Commit` into a
 * detached task that talks to hardware, then reconciles the object
 * model with what actually happened. Spawned rather than awaited inline
 * so a slow device never stalls the reactor's `select!` loop (§5). */
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::device::DeviceHandle;
use crate::registry::DriverContext;

/// Write every dirty entity to hardware and reconcile the model.
///
/// On success, dirty flags are cleared atomically with respect to the
/// transaction (invariant 7): nothing else touches `handle` between the
/// driver call finishing and `clear_all_dirty` running because both
/// happen in this one task with the lock held across them.
///
/// On failure, dirty flags are left set — the client's next `Commit`
/// retries — and the caller is expected to emit the device's `Resync`
/// signal so UIs refresh from the (unchanged) live state rather than
/// assume the write took effect.
pub async fn run_commit(sysname: String, handle: DeviceHandle, driver_ctx: Arc<Mutex<DriverContext>>) -> bool {
    let snapshot = handle.read().await.clone();
    if !snapshot.is_dirty() {
        debug!("commit requested for {sysname} with nothing dirty, skipping");
        return true;
    }

    let mut ctx = driver_ctx.lock().await;

    /* A profile carrying `dirty.active_transition` means this commit
     * includes a profile switch; some protocols need a dedicated command
     * for that distinct from a full profile rewrite. */
    if let Some(profile) = snapshot.profiles.iter().find(|p| p.is_active && p.dirty.active_transition) {
        if let Err(err) = ctx.driver.set_active_profile(&mut ctx.io, profile.index).await {
            warn!("set_active_profile failed for {sysname}: {err:#}");
            return false;
        }
    }

    match ctx.driver.commit(&mut ctx.io, &snapshot).await {
        Ok(()) => {
            handle.write().await.clear_all_dirty();
            debug!("commit succeeded for {sysname}");
            true
        }
        Err(err) => {
            warn!("commit failed for {sysname}: {err:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{new_device_handle, BusId, DeviceState, DeviceType};
    use crate::driver::{DeviceIo, Driver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyDriver {
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Driver for FlakyDriver {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn probe(&mut self, _io: &mut DeviceIo) -> anyhow::Result<DeviceState> {
            unreachable!()
        }
        async fn commit(&mut self, _io: &mut DeviceIo, _state: &DeviceState) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("simulated hardware failure");
            }
            Ok(())
        }
        async fn set_active_profile(&mut self, _io: &mut DeviceIo, _profile_index: u32) -> anyhow::Result<()> {
            Ok(())
        }
        async fn refresh_active_resolution(&mut self, _io: &mut DeviceIo, _profile_index: u32) -> anyhow::Result<u32> {
            Ok(0)
        }
    }

    fn test_handle() -> DeviceHandle {
        new_device_handle(DeviceState::init_profiles(
            "test0",
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

    #[tokio::test]
    async fn clean_snapshot_skips_driver_call() {
        let handle = test_handle();
        let fail = Arc::new(AtomicBool::new(true));
        let ctx = Arc::new(Mutex::new(DriverContext::new(
            Box::new(FlakyDriver { fail: fail.clone() }),
            unsafe_test_io().await,
        )));
        assert!(run_commit("test0".into(), handle, ctx).await);
    }

    #[tokio::test]
    async fn failed_commit_leaves_dirty_bits_set() {
        let handle = test_handle();
        handle.write().await.set_profile_report_rate(0, 2000).unwrap();
        let fail = Arc::new(AtomicBool::new(true));
        let ctx = Arc::new(Mutex::new(DriverContext::new(
            Box::new(FlakyDriver { fail: fail.clone() }),
            unsafe_test_io().await,
        )));
        let ok = run_commit("test0".into(), handle.clone(), ctx).await;
        assert!(!ok);
        assert!(handle.read().await.is_dirty());
    }

    #[tokio::test]
    async fn successful_commit_clears_dirty_bits() {
        let handle = test_handle();
        handle.write().await.set_profile_report_rate(0, 2000).unwrap();
        let fail = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(Mutex::new(DriverContext::new(
            Box::new(FlakyDriver { fail: fail.clone() }),
            unsafe_test_io().await,
        )));
        let ok = run_commit("test0".into(), handle.clone(), ctx).await;
        assert!(ok);
        assert!(!handle.read().await.is_dirty());
    }

    /// `DeviceIo` always wraps a real file; tests use `/dev/null`, which
    /// is harmless since `FlakyDriver` never actually reads or writes it.
    async fn unsafe_test_io() -> DeviceIo {
        DeviceIo::open(std::path::Path::new("/dev/null")).await.unwrap()
    }
}
