//! The block device backing an image.
//!
//! Kept deliberately dumb: fixed-size-block reads and writes over a named
//! backing store, nothing more. Higher layers own caching, bitmaps and
//! everything else.

use crate::error::SfsError;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

/// A fixed-size-block device addressed by block index.
pub trait BlockDevice {
	/// Create a new backing store, zero-filled to `block_bytes * num_blocks`.
	fn init_fresh_disk(&mut self, path: &Path, block_bytes: usize, num_blocks: u32) -> Result<(), SfsError>;

	/// Open an existing backing store without touching its contents.
	fn init_disk(&mut self, path: &Path, block_bytes: usize, num_blocks: u32) -> Result<(), SfsError>;

	/// Read `count` consecutive blocks starting at `start` into `buf`.
	fn read_blocks(&mut self, start: u32, count: usize, buf: &mut [u8]) -> Result<(), SfsError>;

	/// Write `count` consecutive blocks starting at `start` from `buf`.
	fn write_blocks(&mut self, start: u32, count: usize, buf: &[u8]) -> Result<(), SfsError>;

	/// Release the backing store. Not called implicitly on drop.
	fn close_disk(&mut self) -> Result<(), SfsError>;
}

/// A [`BlockDevice`] backed by a single file on the host filesystem.
#[derive(Default)]
pub struct FileBackedDevice {
	file: Option<std::fs::File>,
	block_bytes: usize,
}

impl FileBackedDevice {
	pub fn new() -> Self {
		Self::default()
	}

	fn file_mut(&mut self) -> Result<&mut std::fs::File, SfsError> {
		self.file.as_mut().ok_or(SfsError::Internal("device not open"))
	}
}

impl BlockDevice for FileBackedDevice {
	fn init_fresh_disk(&mut self, path: &Path, block_bytes: usize, num_blocks: u32) -> Result<(), SfsError> {
		let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
		file.set_len(block_bytes as u64 * num_blocks as u64)?;
		self.block_bytes = block_bytes;
		self.file = Some(file);
		Ok(())
	}

	fn init_disk(&mut self, path: &Path, block_bytes: usize, num_blocks: u32) -> Result<(), SfsError> {
		let file = OpenOptions::new().read(true).write(true).open(path)?;
		let have = file.metadata()?.len();
		let want = block_bytes as u64 * num_blocks as u64;
		if have < want {
			return Err(SfsError::Internal("backing store smaller than geometry"));
		}
		self.block_bytes = block_bytes;
		self.file = Some(file);
		Ok(())
	}

	fn read_blocks(&mut self, start: u32, count: usize, buf: &mut [u8]) -> Result<(), SfsError> {
		let block_bytes = self.block_bytes;
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(start as u64 * block_bytes as u64))?;
		file.read_exact(&mut buf[..count * block_bytes])?;
		Ok(())
	}

	fn write_blocks(&mut self, start: u32, count: usize, buf: &[u8]) -> Result<(), SfsError> {
		let block_bytes = self.block_bytes;
		let file = self.file_mut()?;
		file.seek(SeekFrom::Start(start as u64 * block_bytes as u64))?;
		file.write_all(&buf[..count * block_bytes])?;
		file.flush()?;
		Ok(())
	}

	fn close_disk(&mut self) -> Result<(), SfsError> {
		self.file.take();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_disk_is_zeroed_and_sized() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("disk.img");
		let mut dev = FileBackedDevice::new();
		dev.init_fresh_disk(&path, 1024, 4).unwrap();
		let mut buf = vec![0xffu8; 1024];
		dev.read_blocks(0, 1, &mut buf).unwrap();
		assert!(buf.iter().all(|&b| b == 0));
		assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
	}

	#[test]
	fn write_then_read_roundtrips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("disk.img");
		let mut dev = FileBackedDevice::new();
		dev.init_fresh_disk(&path, 1024, 4).unwrap();
		let payload = vec![0x42u8; 1024];
		dev.write_blocks(2, 1, &payload).unwrap();
		let mut out = vec![0u8; 1024];
		dev.read_blocks(2, 1, &mut out).unwrap();
		assert_eq!(out, payload);
	}
}
