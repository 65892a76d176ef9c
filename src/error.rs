//! Error types for the extension loading pipeline.

use alloc::borrow::Cow;
use core::fmt::{Debug, Display};

/// Errors produced while loading an extension.
///
/// The variants follow the loader's failure taxonomy: format errors are
/// always fatal and never retried; resource errors are fatal and followed
/// by a full rollback; unsupported-feature errors are fatal but kept
/// distinct for diagnostic clarity.
#[derive(Debug)]
pub enum Error {
    /// The byte source failed to prepare, seek or read.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },
    /// The ELF image is malformed: bad magic, inconsistent section layout,
    /// missing tables, overlapping regions.
    Format {
        /// A descriptive message about the format error.
        msg: Cow<'static, str>,
    },
    /// The image is well formed but uses a construct this loader does not
    /// support, e.g. an unexpected object kind or duplicate non-mergeable
    /// sections.
    NotSupported {
        /// A descriptive message about the unsupported construct.
        msg: Cow<'static, str>,
    },
    /// An allocation failed.
    NoMemory {
        /// A descriptive message about the failed allocation.
        msg: Cow<'static, str>,
    },
    /// A post-hoc sanity check failed, e.g. a function-table pointer lies
    /// outside the text region.
    Fault {
        /// A descriptive message about the failed check.
        msg: Cow<'static, str>,
    },
}

impl Error {
    /// Returns the negative errno-style status code for shell and C
    /// consumers.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io { .. } => -5,            // EIO
            Error::Format { .. } => -8,        // ENOEXEC
            Error::NoMemory { .. } => -12,     // ENOMEM
            Error::Fault { .. } => -14,        // EFAULT
            Error::NotSupported { .. } => -95, // ENOTSUP
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Format { msg } => write!(f, "format error: {msg}"),
            Error::NotSupported { msg } => write!(f, "unsupported: {msg}"),
            Error::NoMemory { msg } => write!(f, "out of memory: {msg}"),
            Error::Fault { msg } => write!(f, "fault: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn format_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Format { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn not_supported_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::NotSupported { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn no_memory_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::NoMemory { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn fault_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Fault { msg: msg.into() }
}

pub type Result<T> = core::result::Result<T, Error>;
