//! Command buffer lifecycle
//!
//! Every command buffer walks one path through [`Phase`]:
//!
//! ```text
//! Recording { open_encoder: None } <-> Recording { open_encoder: Some(_) }
//!           |
//!           v  commit
//!       Committed --> Completed { failed }
//! ```
//!
//! All encoder scoping rules are enforced here, in one place. The bridge asks
//! the phase before touching recorded state and never mutates it directly.

use crate::error::{BridgeError, Result};
use crate::handle::ObjectKey;

/// Kind of work an encoder records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Compute,
    Render,
    Blit,
}

impl EncoderKind {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Render => "render",
            Self::Blit => "blit",
        }
    }
}

/// Externally visible state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandBufferStatus {
    /// Open for recording, no encoder active
    Recording = 0,
    /// An encoder is open
    Encoding = 1,
    /// Submitted, GPU work pending
    Committed = 2,
    /// GPU work finished successfully
    Completed = 3,
    /// GPU work finished with a fault
    Failed = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Recording { open_encoder: Option<ObjectKey> },
    Committed,
    Completed { failed: bool },
}

impl Phase {
    pub(crate) const fn new() -> Self {
        Self::Recording { open_encoder: None }
    }

    pub(crate) const fn status(self) -> CommandBufferStatus {
        match self {
            Self::Recording { open_encoder: None } => CommandBufferStatus::Recording,
            Self::Recording { open_encoder: Some(_) } => CommandBufferStatus::Encoding,
            Self::Committed => CommandBufferStatus::Committed,
            Self::Completed { failed: false } => CommandBufferStatus::Completed,
            Self::Completed { failed: true } => CommandBufferStatus::Failed,
        }
    }

    /// Whether `encoder` is the one currently open
    pub(crate) fn is_open(self, encoder: ObjectKey) -> bool {
        self == Self::Recording { open_encoder: Some(encoder) }
    }

    /// Whether the buffer has left the recording phases
    pub(crate) const fn is_committed(self) -> bool {
        !matches!(self, Self::Recording { .. })
    }

    pub(crate) fn begin_encoder(&mut self, encoder: ObjectKey) -> Result<()> {
        match *self {
            Self::Recording { open_encoder: None } => {
                *self = Self::Recording { open_encoder: Some(encoder) };
                Ok(())
            }
            Self::Recording { open_encoder: Some(_) } => Err(BridgeError::state("another encoder is still open on this command buffer")),
            _ => Err(BridgeError::state("command buffer was already committed")),
        }
    }

    pub(crate) fn end_encoder(&mut self, encoder: ObjectKey) -> Result<()> {
        if !self.is_open(encoder) {
            return Err(BridgeError::state("encoder is not open"));
        }
        *self = Self::Recording { open_encoder: None };
        Ok(())
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        match *self {
            Self::Recording { open_encoder: None } => {
                *self = Self::Committed;
                Ok(())
            }
            Self::Recording { open_encoder: Some(_) } => Err(BridgeError::state("cannot commit while an encoder is open")),
            _ => Err(BridgeError::state("command buffer was already committed")),
        }
    }

    /// Records the GPU outcome; later calls keep the first outcome
    pub(crate) fn complete(&mut self, failed: bool) {
        if *self == Self::Committed {
            *self = Self::Completed { failed };
        }
    }

    pub(crate) fn ensure_recording(self) -> Result<()> {
        if self.is_committed() {
            return Err(BridgeError::state("command buffer was already committed"));
        }
        Ok(())
    }
}
