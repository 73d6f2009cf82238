//! Inodes and the inode pool.
//!
//! An inode addresses its data through `DIRECT_PTRS` direct block pointers
//! and, once those are exhausted, a single indirect block full of further
//! pointers. A pointer value of `0` means "unset". Block `0` holds the
//! superblock and is never a valid data block, so it doubles as the sentinel.

use crate::geometry::DIRECT_PTRS;
use crate::geometry::INODES_PER_BLOCK;
use crate::geometry::INODE_BYTES;
use crate::geometry::NUM_INODES;

/// One inode: file size in bytes and its block pointers.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
	/// File size in bytes, or a negative value if this inode is free.
	pub size: i32,
	/// Direct block pointers; `0` marks an unused slot.
	pub direct: [u32; DIRECT_PTRS],
	/// Indirect block pointer; `0` if the file never grew past the direct pointers.
	pub indirect: u32,
}

impl Inode {
	pub const FREE: Self = Self { size: -1, direct: [0; DIRECT_PTRS], indirect: 0 };

	pub fn is_free(&self) -> bool {
		self.size < 0
	}

	pub fn to_bytes(&self, out: &mut [u8]) {
		debug_assert_eq!(out.len(), INODE_BYTES);
		out[0..4].copy_from_slice(&self.size.to_le_bytes());
		for (i, ptr) in self.direct.iter().enumerate() {
			let off = 4 + i * 4;
			out[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
		}
		let off = 4 + DIRECT_PTRS * 4;
		out[off..off + 4].copy_from_slice(&self.indirect.to_le_bytes());
	}

	pub fn from_bytes(bytes: &[u8]) -> Self {
		debug_assert_eq!(bytes.len(), INODE_BYTES);
		let size = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
		let mut direct = [0u32; DIRECT_PTRS];
		for (i, slot) in direct.iter_mut().enumerate() {
			let off = 4 + i * 4;
			*slot = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
		}
		let off = 4 + DIRECT_PTRS * 4;
		let indirect = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
		Self { size, direct, indirect }
	}
}

impl Default for Inode {
	fn default() -> Self {
		Self::FREE
	}
}

/// The whole inode pool, kept in memory and flushed back as a run of blocks.
pub struct InodeStore {
	inodes: Vec<Inode>,
}

impl InodeStore {
	pub fn empty() -> Self {
		Self { inodes: vec![Inode::FREE; NUM_INODES as usize] }
	}

	/// Rebuild from `INODE_FILE_BLOCKS` concatenated blocks of raw bytes.
	pub fn from_blocks(data: &[u8]) -> Self {
		let mut inodes = Vec::with_capacity(NUM_INODES as usize);
		for i in 0..NUM_INODES as usize {
			let off = i * INODE_BYTES;
			inodes.push(Inode::from_bytes(&data[off..off + INODE_BYTES]));
		}
		Self { inodes }
	}

	/// Flatten into `INODE_FILE_BLOCKS` blocks worth of bytes, padding the
	/// tail of the last block with free inodes.
	pub fn to_blocks(&self, num_blocks: usize, block_bytes: usize) -> Vec<u8> {
		let mut out = vec![0u8; num_blocks * block_bytes];
		for (i, inode) in self.inodes.iter().enumerate() {
			let off = i * INODE_BYTES;
			inode.to_bytes(&mut out[off..off + INODE_BYTES]);
		}
		for i in self.inodes.len()..num_blocks * INODES_PER_BLOCK {
			let off = i * INODE_BYTES;
			if off + INODE_BYTES <= out.len() {
				Inode::FREE.to_bytes(&mut out[off..off + INODE_BYTES]);
			}
		}
		out
	}

	pub fn get(&self, no: u32) -> Option<&Inode> {
		self.inodes.get(no as usize)
	}

	pub fn get_mut(&mut self, no: u32) -> Option<&mut Inode> {
		self.inodes.get_mut(no as usize)
	}

	pub fn set(&mut self, no: u32, inode: Inode) {
		self.inodes[no as usize] = inode;
	}

	/// First free inode number, without marking it used.
	pub fn first_free(&self) -> Option<u32> {
		self.inodes.iter().position(|i| i.is_free()).map(|i| i as u32)
	}
}
