/* Driver framework (§4.2): the `Driver` trait every protocol
 * implementation satisfies, the `DeviceIo` HID transport helpers shared
 * by all of them, and the driver-error taxonomy `error.rs` maps onto the
 * bus-facing `RatbagError` codes. */
pub mod openinput;

#[cfg(feature = "dev-hooks")]
pub mod test_driver;

use nix::libc;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::device::DeviceState;

/* Domain-specific error variants for all driver I/O operations.    */
/*                                                                   */
/* Structured variants let `error::from_driver_error` take different */
/* bus-error decisions per failure mode instead of collapsing every  */
/* hardware problem into one opaque code.                            */
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O failure on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Feature report ioctl failed: {0}")]
    IoctlFailed(std::io::Error),

    #[error("Hardware timed out after {attempts} attempt(s)")]
    Timeout { attempts: u8 },

    #[error("Checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch { computed: u16, received: u16 },

    #[error("Device reported protocol error (sub_id={sub_id:#04x}, error={error:#04x})")]
    ProtocolError { sub_id: u8, error: u8 },

    #[error("Invalid buffer size: expected at least {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
}

/* Roccat macros are the largest known HID report at 2082 bytes; 4096 is
 * a safe ceiling for any current or future report. */
#[allow(dead_code)]
const MAX_REPORT_LEN: usize = 4096;

const READ_TIMEOUT_PER_ATTEMPT: Duration = Duration::from_millis(2000);
const SINGLE_READ_TIMEOUT: Duration = Duration::from_millis(500);

const HIDPP_SHORT_REPORT_ID: u8 = 0x10;
const HIDPP_LONG_REPORT_ID: u8 = 0x11;

/* Linux hidraw.h: `_IOC(_IOC_READ|_IOC_WRITE, 'H', 0x07, len)`. */
fn hid_get_feature_req(len: usize) -> libc::c_ulong {
    let ioc_readwrite: libc::c_ulong = 3;
    let ioc_type: libc::c_ulong = b'H' as libc::c_ulong;
    let ioc_nr: libc::c_ulong = 0x07;
    (ioc_readwrite << 30) | (ioc_type << 8) | ioc_nr | ((len as libc::c_ulong) << 16)
}

/* Linux hidraw.h: `_IOC(_IOC_READ|_IOC_WRITE, 'H', 0x06, len)`. */
#[allow(dead_code)]
fn hid_set_feature_req(len: usize) -> libc::c_ulong {
    let ioc_readwrite: libc::c_ulong = 3;
    let ioc_type: libc::c_ulong = b'H' as libc::c_ulong;
    let ioc_nr: libc::c_ulong = 0x06;
    (ioc_readwrite << 30) | (ioc_type << 8) | ioc_nr | ((len as libc::c_ulong) << 16)
}

/// Async wrapper around a `/dev/hidraw*` file descriptor. All hardware
/// I/O goes through this so drivers never touch raw file handles.
pub struct DeviceIo {
    file: tokio::fs::File,
    path: std::path::PathBuf,
}

impl DeviceIo {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open hidraw device {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub async fn write_report(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .await
            .with_context(|| format!("Write failed on {}", self.path.display()))?;
        debug!("TX {} bytes: {:02x?}", buf.len(), buf);
        Ok(())
    }

    pub async fn read_report(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .file
            .read(buf)
            .await
            .with_context(|| format!("Read failed on {}", self.path.display()))?;
        debug!("RX {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    /// `buf[0]` must hold the report ID before the call; the kernel
    /// fills the rest via `HIDIOCGFEATURE`.
    pub fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let fd = self.file.as_raw_fd();
        let req = hid_get_feature_req(buf.len());

        /* SAFETY: `fd` is a valid open file descriptor for the lifetime
         * of this call; `buf`'s length is encoded into `req`, and the
         * kernel writes at most that many bytes back into it. */
        let res = unsafe { libc::ioctl(fd, req, buf.as_mut_ptr()) };

        if res < 0 {
            return Err(DriverError::IoctlFailed(std::io::Error::last_os_error()));
        }

        let n = res as usize;
        debug!("GET_FEATURE {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    pub fn set_feature_report(&self, buf: &[u8]) -> Result<usize, DriverError> {
        let fd = self.file.as_raw_fd();
        let req = hid_set_feature_req(buf.len());

        /* SAFETY: `fd` is a valid open file descriptor for the lifetime
         * of this call; `buf` is a live immutable slice whose length is
         * encoded into `req`. */
        let res = unsafe { libc::ioctl(fd, req, buf.as_ptr()) };

        if res < 0 {
            return Err(DriverError::IoctlFailed(std::io::Error::last_os_error()));
        }

        let n = res as usize;
        debug!("SET_FEATURE {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    /// Send `report` and wait for a matching response, retrying up to
    /// `max_attempts` times. The read loop is time-based rather than
    /// count-based: wireless receivers multiplex protocol responses with
    /// ordinary mouse input reports on the same node, and those can
    /// arrive at hundreds of reports per second — a count-based loop
    /// would exhaust its budget on noise before the real response
    /// arrives. Reports not starting with a HID++ report ID are
    /// discarded rather than matched.
    pub async fn request<T, F>(
        &mut self,
        report: &[u8],
        report_size: usize,
        max_attempts: u8,
        mut matcher: F,
    ) -> Result<T>
    where
        F: FnMut(&[u8]) -> Option<T>,
    {
        for attempt in 1..=max_attempts {
            self.write_report(report).await?;

            let deadline = tokio::time::Instant::now() + READ_TIMEOUT_PER_ATTEMPT;
            let mut buf = vec![0u8; report_size];

            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    debug!("Read deadline expired on attempt {attempt}");
                    break;
                }

                let read_timeout = remaining.min(SINGLE_READ_TIMEOUT);

                match tokio::time::timeout(read_timeout, self.read_report(&mut buf)).await {
                    Ok(Ok(n)) => {
                        if n > 0
                            && buf[0] != HIDPP_SHORT_REPORT_ID
                            && buf[0] != HIDPP_LONG_REPORT_ID
                        {
                            continue;
                        }
                        if let Some(result) = matcher(&buf[..n]) {
                            return Ok(result);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Read error on attempt {attempt}: {e}");
                        break;
                    }
                    Err(_elapsed) => {
                        debug!("Timeout on attempt {attempt}");
                        break;
                    }
                }
            }
        }

        Err(DriverError::Timeout {
            attempts: max_attempts,
        }
        .into())
    }
}

/// The universal protocol interface (spec §4.2). Every supported
/// protocol implements this; the reactor (C8) and commit scheduler (C6)
/// only ever see it through `&mut dyn Driver`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name, for logging and `.device` database matching.
    fn name(&self) -> &str;

    /// Probe and read the full device state from hardware into a fresh
    /// `DeviceState`. Implementations call `DeviceState::init_profiles`
    /// with the lattice shape they discover, then populate every entity
    /// and finish by running `check_invariants`.
    async fn probe(&mut self, io: &mut DeviceIo) -> Result<DeviceState>;

    /// Write every dirty entity in `state` to hardware. Implementations
    /// diff against their own last-known-good snapshot so only changed
    /// fields are transmitted; the caller clears dirty flags only after
    /// this returns `Ok`.
    async fn commit(&mut self, io: &mut DeviceIo, state: &DeviceState) -> Result<()>;

    /// Switch the device's active profile at the protocol level. Called
    /// separately from `commit` because some protocols require a
    /// dedicated "set active profile" command distinct from a full
    /// profile rewrite.
    async fn set_active_profile(&mut self, io: &mut DeviceIo, profile_index: u32) -> Result<()>;

    /// Read back which resolution is currently active in hardware (the
    /// user may have switched it with an on-device button). Polled every
    /// tick by C7.
    async fn refresh_active_resolution(&mut self, io: &mut DeviceIo, profile_index: u32) -> Result<u32>;

    /// Release any driver-held resources as the device is removed from
    /// the registry. Most drivers need nothing beyond dropping `self`;
    /// this exists for protocols that must send an explicit disconnect.
    async fn remove(&mut self, _io: &mut DeviceIo) -> Result<()> {
        Ok(())
    }
}

/// Instantiate the driver named in a `.device` database entry.
pub fn create_driver(driver_name: &str) -> Option<Box<dyn Driver>> {
    match driver_name {
        "openinput" => Some(Box::new(openinput::OpenInputDriver::new())),
        #[cfg(feature = "dev-hooks")]
        "test" => Some(Box::new(test_driver::TestDriver::new())),
        _ => {
            warn!("Unknown driver: {driver_name}");
            None
        }
    }
}
