/* Requests bus objects hand back to the reactor (C8), the only task that
 * owns the registry, the object server, and driver transports. Bus
 * method bodies never touch those directly — they just enqueue a
 * request and, for `Commit`, return immediately (§4.6). */
use tokio::sync::{mpsc, oneshot};

use crate::error::RatbagError;

#[derive(Debug)]
pub enum ControlRequest {
    /// Schedule a deferred commit for `sysname`. Fire-and-forget: the
    /// bus method that sends this returns before the hardware write
    /// happens.
    Commit { sysname: String },

    /// `dev-hooks` only: parse a JSON device spec, register it as if a
    /// real device had been hot-plugged, and report back a status code
    /// (0 on success).
    #[cfg(feature = "dev-hooks")]
    LoadTestDevice {
        json: String,
        reply: oneshot::Sender<Result<i32, RatbagError>>,
    },

    /// `dev-hooks` only: remove every synthetic test device.
    #[cfg(feature = "dev-hooks")]
    ResetTestDevice { reply: oneshot::Sender<()> },
}

pub type ControlSender = mpsc::UnboundedSender<ControlRequest>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlRequest>;

pub fn channel() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}
