use std::io;

use thiserror::Error;

use crate::usb::setup::Setup;

/// Fatal daemon errors, split along the two tiers the design works with:
/// broken boundary I/O (`Transport`) and protocol conditions with no defined
/// handling path. Protocol stalls are not errors and never appear here.
#[derive(Debug, Error)]
pub enum TabletError {
    #[error("{op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The dispatcher has no defined response for this request; answering it
    /// with a guess would be worse than aborting.
    #[error("no response defined for control request {setup:?}")]
    NoResponse { setup: Setup },

    /// The controller offers no endpoint compatible with the interrupt IN
    /// endpoint the device requires. Enumeration cannot proceed.
    #[error("no UDC endpoint is compatible with the interrupt IN endpoint")]
    NoCompatibleEndpoint,

    #[error("descriptor assembly needs {needed} bytes, buffer holds {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

impl TabletError {
    pub fn transport(op: &'static str, source: io::Error) -> Self {
        Self::Transport { op, source }
    }
}

pub type Result<T, E = TabletError> = std::result::Result<T, E>;
