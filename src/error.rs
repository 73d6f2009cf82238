//! Error type returned by every [`crate::Sfs`] operation.

use std::fmt;
use std::io;

/// Everything that can go wrong while mounting or operating on an image.
#[derive(Debug)]
pub enum SfsError {
	/// The free bitmap has no block left to allocate.
	NoSpace,
	/// The inode pool has no free inode left to allocate.
	NoInode,
	/// The open-file table is full.
	NoHandle,
	/// No entry with this name exists in the live directory.
	NotFound,
	/// `fopen` was called on a name that already has an active handle.
	AlreadyOpen,
	/// A caller-supplied argument is invalid.
	BadArg(&'static str),
	/// The underlying block device reported an error.
	Io(io::Error),
	/// An on-disk invariant was violated; the image cannot be trusted further.
	Internal(&'static str),
}

impl fmt::Display for SfsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoSpace => write!(f, "no space left on device"),
			Self::NoInode => write!(f, "no free inode"),
			Self::NoHandle => write!(f, "too many open files"),
			Self::NotFound => write!(f, "no such file"),
			Self::AlreadyOpen => write!(f, "file already open"),
			Self::BadArg(msg) => write!(f, "invalid argument: {msg}"),
			Self::Io(e) => write!(f, "I/O error: {e}"),
			Self::Internal(msg) => write!(f, "filesystem corrupted: {msg}"),
		}
	}
}

impl std::error::Error for SfsError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SfsError {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}
