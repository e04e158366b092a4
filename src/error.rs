//! Session error types

use crate::manager::SessionHandle;
use crate::protocol::MAX_DEVICES;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors returned by [`SessionManager`](crate::manager::SessionManager)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device index {0} outside 1..={max}", max = MAX_DEVICES)]
    InvalidIndex(usize),

    #[error("device #{0} is already open")]
    AlreadyOpen(SessionHandle),

    #[error("cannot find device #{0}")]
    DeviceNotFound(usize),

    #[error("device #{0} is not open")]
    Closed(SessionHandle),

    #[error("cannot write LED {index}: {source}")]
    IndicatorWrite {
        index: u8,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
