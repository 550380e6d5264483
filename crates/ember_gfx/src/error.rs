//! # GFX Error Types
//!
//! All errors that can occur while creating or driving GPU resources.

use thiserror::Error;

use crate::resource::ResourceId;

/// Errors raised by the GPU abstraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    /// A buffer or texture descriptor is unusable.
    #[error("invalid descriptor for '{label}': {reason}")]
    InvalidDescriptor {
        /// Debug label of the resource.
        label: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The handle does not name a live resource of this device.
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),

    /// A write, copy or read fell outside the resource.
    #[error("access out of range on '{label}': offset {offset} + {len} bytes exceeds {size}")]
    OutOfRange {
        /// Debug label of the resource.
        label: &'static str,
        /// Byte offset of the access.
        offset: u64,
        /// Byte length of the access.
        len: u64,
        /// Size of the resource in bytes.
        size: u64,
    },

    /// The resource has no hidden append/consume counter.
    #[error("resource '{0}' has no append/consume counter")]
    NoCounter(&'static str),

    /// A program slot was left unbound at dispatch or draw time.
    #[error("program '{program}' requires slot {slot} which is not bound")]
    UnboundSlot {
        /// Program label.
        program: &'static str,
        /// Slot description.
        slot: String,
    },

    /// A resource was bound to a slot it cannot serve.
    #[error("resource '{label}' cannot be bound as {slot}")]
    BindingMismatch {
        /// Debug label of the resource.
        label: &'static str,
        /// Slot description.
        slot: String,
    },

    /// The native backend failed.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result type for GPU abstraction operations.
pub type GfxResult<T> = Result<T, GfxError>;
