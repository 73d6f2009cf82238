//! The shadow file system engine: the type that ties bitmaps, inodes, the
//! directory ring and open files together over a [`BlockDevice`].

use std::path::Path;

use log::debug;
use log::info;
use log::warn;

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::directory::DirEntry;
use crate::directory::DirectoryBlock;
use crate::error::SfsError;
use crate::geometry::BLOCK_BYTES;
use crate::geometry::DIRECT_PTRS;
use crate::geometry::FIRST_DATA_BLOCK;
use crate::geometry::FREE_MAP_BLOCK;
use crate::geometry::IND_PTRS;
use crate::geometry::INODE_FILE_BLOCKS;
use crate::geometry::LAST_DATA_BLOCK;
use crate::geometry::MAX_NAME;
use crate::geometry::NUM_INODES;
use crate::geometry::SHADOW_SLOTS;
use crate::geometry::WRITE_MASK_BLOCK;
use crate::geometry::directory_block;
use crate::handle::Cursor;
use crate::handle::OpenFile;
use crate::handle::OpenFileTable;
use crate::inode::Inode;
use crate::inode::InodeStore;
use crate::superblock::SuperBlock;

/// A mounted shadow file system image.
pub struct Sfs<D: BlockDevice> {
	device: D,
	superblock: SuperBlock,
	free_map: Bitmap,
	write_mask: Bitmap,
	inodes: InodeStore,
	/// `directories[0]` is live; `directories[1..]` are shadows, oldest last.
	directories: [DirectoryBlock; SHADOW_SLOTS],
	open_files: OpenFileTable,
	dir_cursor: usize,
}

fn offset_to_cursor(offset: u32) -> Cursor {
	if offset == 0 {
		return Cursor::START;
	}
	let block = (offset - 1) / BLOCK_BYTES as u32;
	let byte_in_block = offset - block * BLOCK_BYTES as u32;
	Cursor { block, byte_in_block }
}

fn cursor_to_offset(c: Cursor) -> u32 {
	c.block * BLOCK_BYTES as u32 + c.byte_in_block
}

/// A bitmap with the whole data region marked free and everything else
/// (superblock, inode file, directory ring, the bitmaps themselves) left
/// marked allocated.
fn fresh_data_bitmap() -> Bitmap {
	let mut bitmap = Bitmap::new();
	for block in FIRST_DATA_BLOCK..=LAST_DATA_BLOCK {
		bitmap.set(block);
	}
	bitmap
}

/// Every inode, even an empty file, occupies at least one data block.
fn num_blocks_for_size(size: i32) -> u32 {
	(size.max(0) as u32).div_ceil(BLOCK_BYTES as u32).max(1)
}

impl<D: BlockDevice> Sfs<D> {
	/// Format or mount an image at `path`, depending on `fresh`.
	pub fn mkssfs(mut device: D, path: &Path, fresh: bool) -> Result<Self, SfsError> {
		if fresh {
			device.init_fresh_disk(path, BLOCK_BYTES, crate::geometry::NUM_BLOCKS)?;
			let mut fs = Self {
				device,
				superblock: SuperBlock::fresh(),
				free_map: fresh_data_bitmap(),
				write_mask: fresh_data_bitmap(),
				inodes: InodeStore::empty(),
				directories: [DirectoryBlock::EMPTY; SHADOW_SLOTS],
				open_files: OpenFileTable::new(),
				dir_cursor: 0,
			};
			fs.flush_all()?;
			info!("formatted fresh shadow file system image");
			Ok(fs)
		} else {
			device.init_disk(path, BLOCK_BYTES, crate::geometry::NUM_BLOCKS)?;
			let mut fs = Self {
				device,
				superblock: SuperBlock::fresh(),
				free_map: Bitmap::new(),
				write_mask: Bitmap::new(),
				inodes: InodeStore::empty(),
				directories: [DirectoryBlock::EMPTY; SHADOW_SLOTS],
				open_files: OpenFileTable::new(),
				dir_cursor: 0,
			};
			fs.load_all()?;
			if !fs.superblock.is_valid() {
				return Err(SfsError::Internal("bad superblock magic"));
			}
			info!("mounted shadow file system image, {} inodes in use", fs.inodes_in_use());
			Ok(fs)
		}
	}

	fn inodes_in_use(&self) -> usize {
		(0..NUM_INODES).filter(|&i| !self.inodes.get(i).unwrap().is_free()).count()
	}

	fn read_block(&mut self, addr: u32) -> Result<[u8; BLOCK_BYTES], SfsError> {
		let mut buf = [0u8; BLOCK_BYTES];
		self.device.read_blocks(addr, 1, &mut buf)?;
		Ok(buf)
	}

	fn write_block(&mut self, addr: u32, bytes: &[u8; BLOCK_BYTES]) -> Result<(), SfsError> {
		self.device.write_blocks(addr, 1, bytes)
	}

	fn read_indirect(&mut self, addr: u32) -> Result<[u32; IND_PTRS], SfsError> {
		let buf = self.read_block(addr)?;
		let mut ptrs = [0u32; IND_PTRS];
		for (i, ptr) in ptrs.iter_mut().enumerate() {
			*ptr = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
		}
		Ok(ptrs)
	}

	fn write_indirect(&mut self, addr: u32, ptrs: &[u32; IND_PTRS]) -> Result<(), SfsError> {
		let mut buf = [0u8; BLOCK_BYTES];
		for (i, ptr) in ptrs.iter().enumerate() {
			buf[i * 4..i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
		}
		self.write_block(addr, &buf)
	}

	fn flush_superblock(&mut self) -> Result<(), SfsError> {
		let bytes = self.superblock.to_bytes();
		self.write_block(crate::geometry::SUPERBLOCK_BLOCK, &bytes)
	}

	fn flush_inodes(&mut self) -> Result<(), SfsError> {
		let blocks = self.inodes.to_blocks(INODE_FILE_BLOCKS as usize, BLOCK_BYTES);
		self.device.write_blocks(1, INODE_FILE_BLOCKS as usize, &blocks)
	}

	fn flush_directory(&mut self, slot: usize) -> Result<(), SfsError> {
		let bytes = self.directories[slot].to_bytes();
		self.write_block(directory_block(slot), &bytes)
	}

	fn flush_bitmaps(&mut self) -> Result<(), SfsError> {
		let free = self.free_map.to_bytes();
		self.write_block(FREE_MAP_BLOCK, &free)?;
		let written = self.write_mask.to_bytes();
		self.write_block(WRITE_MASK_BLOCK, &written)
	}

	fn flush_all(&mut self) -> Result<(), SfsError> {
		self.flush_superblock()?;
		self.flush_inodes()?;
		for slot in 0..SHADOW_SLOTS {
			self.flush_directory(slot)?;
		}
		self.flush_bitmaps()
	}

	fn load_all(&mut self) -> Result<(), SfsError> {
		let sb_bytes = self.read_block(crate::geometry::SUPERBLOCK_BLOCK)?;
		self.superblock = SuperBlock::from_bytes(&sb_bytes);

		let mut inode_bytes = vec![0u8; INODE_FILE_BLOCKS as usize * BLOCK_BYTES];
		self.device.read_blocks(1, INODE_FILE_BLOCKS as usize, &mut inode_bytes)?;
		self.inodes = InodeStore::from_blocks(&inode_bytes);

		for slot in 0..SHADOW_SLOTS {
			let bytes = self.read_block(directory_block(slot))?;
			self.directories[slot] = DirectoryBlock::from_bytes(&bytes);
		}

		let free_bytes = self.read_block(FREE_MAP_BLOCK)?;
		self.free_map = Bitmap::from_bytes(&free_bytes);
		let write_bytes = self.read_block(WRITE_MASK_BLOCK)?;
		self.write_mask = Bitmap::from_bytes(&write_bytes);
		Ok(())
	}

	fn allocate_block(&mut self) -> Result<u32, SfsError> {
		let addr = self.free_map.first_set(FIRST_DATA_BLOCK, LAST_DATA_BLOCK).ok_or_else(|| {
			warn!("no free data block left");
			SfsError::NoSpace
		})?;
		self.free_map.clear(addr);
		self.write_mask.clear(addr);
		debug!("allocated block {addr}");
		Ok(addr)
	}

	fn free_block(&mut self, addr: u32) {
		self.free_map.set(addr);
		self.write_mask.set(addr);
		debug!("freed block {addr}");
	}

	fn allocate_inode(&mut self) -> Result<u32, SfsError> {
		self.inodes.first_free().ok_or_else(|| {
			warn!("no free inode left");
			SfsError::NoInode
		})
	}

	fn block_ptr_at(&mut self, inode: &Inode, logical: u32) -> Result<u32, SfsError> {
		if (logical as usize) < DIRECT_PTRS {
			return Ok(inode.direct[logical as usize]);
		}
		let idx = logical as usize - DIRECT_PTRS;
		if idx >= IND_PTRS {
			return Err(SfsError::BadArg("file exceeds maximum size"));
		}
		if inode.indirect == 0 {
			return Ok(0);
		}
		let ptrs = self.read_indirect(inode.indirect)?;
		Ok(ptrs[idx])
	}

	/// Point logical block `logical` of `inode` at `addr`, allocating the
	/// indirect block first if this is the first pointer past `DIRECT_PTRS`.
	fn set_block_ptr(&mut self, inode: &mut Inode, logical: u32, addr: u32) -> Result<(), SfsError> {
		if (logical as usize) < DIRECT_PTRS {
			inode.direct[logical as usize] = addr;
			return Ok(());
		}
		let idx = logical as usize - DIRECT_PTRS;
		if idx >= IND_PTRS {
			return Err(SfsError::BadArg("file exceeds maximum size"));
		}
		if inode.indirect == 0 {
			inode.indirect = self.allocate_block()?;
			self.write_indirect(inode.indirect, &[0u32; IND_PTRS])?;
		}
		let mut ptrs = self.read_indirect(inode.indirect)?;
		ptrs[idx] = addr;
		self.write_indirect(inode.indirect, &ptrs)
	}

	/// Return the device block backing logical block `logical` of `inode_no`,
	/// allocating a fresh one (and linking it into the chain) if needed.
	fn ensure_block(&mut self, inode_no: u32, logical: u32) -> Result<u32, SfsError> {
		let mut inode = *self.inodes.get(inode_no).ok_or(SfsError::Internal("bad inode number"))?;
		let existing = self.block_ptr_at(&inode, logical)?;
		if existing != 0 {
			return Ok(existing);
		}
		let addr = self.allocate_block()?;
		self.set_block_ptr(&mut inode, logical, addr)?;
		self.inodes.set(inode_no, inode);
		Ok(addr)
	}

	/// Free every data block, indirect block, and the inode slot itself.
	fn free_chain(&mut self, inode_no: u32) -> Result<(), SfsError> {
		let inode = *self.inodes.get(inode_no).ok_or(SfsError::Internal("bad inode number"))?;
		for &ptr in inode.direct.iter() {
			if ptr != 0 {
				self.free_block(ptr);
			}
		}
		if inode.indirect != 0 {
			let ptrs = self.read_indirect(inode.indirect)?;
			for ptr in ptrs {
				if ptr != 0 {
					self.free_block(ptr);
				}
			}
			self.free_block(inode.indirect);
		}
		self.inodes.set(inode_no, Inode::FREE);
		Ok(())
	}

	/// Deep-copy a file: a fresh inode with its own freshly allocated data
	/// blocks, each allocated before the corresponding source block is
	/// copied into it so a destination block is never written through an
	/// unallocated (and possibly shared) pointer.
	fn copy_file(&mut self, src_inode_no: u32) -> Result<u32, SfsError> {
		let src = *self.inodes.get(src_inode_no).ok_or(SfsError::Internal("bad inode number"))?;
		let dst_no = self.allocate_inode()?;
		let mut dst = Inode { size: src.size, ..Inode::FREE };
		let blocks = num_blocks_for_size(src.size);
		for logical in 0..blocks {
			let src_addr = self.block_ptr_at(&src, logical)?;
			if src_addr == 0 {
				return Err(SfsError::Internal("hole in block chain during copy"));
			}
			let data = self.read_block(src_addr)?;
			let dst_addr = self.allocate_block()?;
			self.write_block(dst_addr, &data)?;
			self.set_block_ptr(&mut dst, logical, dst_addr)?;
		}
		self.inodes.set(dst_no, dst);
		Ok(dst_no)
	}

	/// Deep-copy every entry of directory slot `src_slot` into a brand new
	/// [`DirectoryBlock`], each entry pointing at its own independent inode.
	fn copy_directory(&mut self, src_slot: usize) -> Result<DirectoryBlock, SfsError> {
		let mut out = DirectoryBlock::EMPTY;
		let entries: Vec<(String, u32)> =
			self.directories[src_slot].iter().map(|e| (e.name().to_owned(), e.inode_no)).collect();
		for (name, inode_no) in entries {
			let new_inode_no = self.copy_file(inode_no)?;
			let slot = out.first_free().ok_or(SfsError::Internal("shadow directory overflow"))?;
			out.set_entry(slot, DirEntry::new(&name, new_inode_no));
		}
		Ok(out)
	}

	/// Snapshot the live directory into shadow slot 1, aging older shadows
	/// down and dropping (and reclaiming) the oldest one.
	pub fn commit(&mut self) -> Result<(), SfsError> {
		for entry_idx in 0..DirectoryBlock::capacity() {
			let entry = *self.directories[SHADOW_SLOTS - 1].entry(entry_idx);
			if !entry.is_free() {
				self.free_chain(entry.inode_no)?;
			}
		}
		for slot in (2..SHADOW_SLOTS).rev() {
			self.directories[slot] = self.directories[slot - 1];
		}
		self.directories[1] = self.copy_directory(0)?;
		self.flush_inodes()?;
		self.flush_bitmaps()?;
		for slot in 1..SHADOW_SLOTS {
			self.flush_directory(slot)?;
		}
		info!("committed a new shadow");
		Ok(())
	}

	/// Replace the live directory with an independent deep copy of shadow
	/// slot `slot` (`1..SHADOW_SLOTS`).
	pub fn restore(&mut self, slot: usize) -> Result<(), SfsError> {
		if slot == 0 || slot >= SHADOW_SLOTS {
			return Err(SfsError::BadArg("shadow slot out of range"));
		}
		for entry_idx in 0..DirectoryBlock::capacity() {
			let entry = *self.directories[0].entry(entry_idx);
			if !entry.is_free() {
				if self.open_files.is_open(entry.inode_no) {
					return Err(SfsError::AlreadyOpen);
				}
				self.free_chain(entry.inode_no)?;
			}
		}
		self.directories[0] = self.copy_directory(slot)?;
		self.flush_inodes()?;
		self.flush_bitmaps()?;
		self.flush_directory(0)?;
		info!("restored live directory from shadow {slot}");
		Ok(())
	}

	fn validate_name(name: &str) -> Result<(), SfsError> {
		if name.is_empty() {
			return Err(SfsError::BadArg("empty file name"));
		}
		if name.len() > MAX_NAME {
			return Err(SfsError::BadArg("file name too long"));
		}
		Ok(())
	}

	/// Open `name`, creating it in the live directory if it does not exist.
	pub fn fopen(&mut self, name: &str) -> Result<usize, SfsError> {
		Self::validate_name(name)?;
		let inode_no = match self.directories[0].find(name) {
			Some(slot) => self.directories[0].entry(slot).inode_no,
			None => {
				let dir_slot = self.directories[0].first_free().ok_or(SfsError::NoSpace)?;
				let inode_no = self.allocate_inode()?;
				let mut inode = Inode { size: 0, ..Inode::FREE };
				let block = self.allocate_block()?;
				inode.direct[0] = block;
				self.inodes.set(inode_no, inode);
				self.directories[0].set_entry(dir_slot, DirEntry::new(name, inode_no));
				self.flush_inodes()?;
				self.flush_bitmaps()?;
				self.flush_directory(0)?;
				inode_no
			}
		};
		if self.open_files.is_open(inode_no) {
			warn!("{name} is already open");
			return Err(SfsError::AlreadyOpen);
		}
		let fd = self.open_files.first_free_fd().ok_or(SfsError::NoHandle)?;
		let size = self.inodes.get(inode_no).unwrap().size.max(0) as u32;
		let write = offset_to_cursor(size);
		self.open_files.open(fd, OpenFile { inode_no, read: Cursor::START, write });
		Ok(fd)
	}

	pub fn fclose(&mut self, fd: usize) -> Result<(), SfsError> {
		if self.open_files.get(fd).is_none() {
			return Err(SfsError::BadArg("fd not open"));
		}
		self.open_files.close(fd);
		self.flush_superblock()?;
		self.flush_inodes()?;
		self.flush_directory(0)?;
		self.flush_bitmaps()?;
		Ok(())
	}

	fn open_file(&self, fd: usize) -> Result<OpenFile, SfsError> {
		self.open_files.get(fd).copied().ok_or(SfsError::BadArg("fd not open"))
	}

	pub fn frseek(&mut self, fd: usize, loc: i32) -> Result<(), SfsError> {
		let file = self.open_file(fd)?;
		let size = self.inodes.get(file.inode_no).unwrap().size.max(0);
		if loc < 0 || loc > size {
			return Err(SfsError::BadArg("seek position out of range"));
		}
		self.open_files.get_mut(fd).unwrap().read = offset_to_cursor(loc as u32);
		Ok(())
	}

	pub fn fwseek(&mut self, fd: usize, loc: i32) -> Result<(), SfsError> {
		let file = self.open_file(fd)?;
		let size = self.inodes.get(file.inode_no).unwrap().size.max(0);
		if loc < 0 || loc > size {
			return Err(SfsError::BadArg("seek position out of range"));
		}
		self.open_files.get_mut(fd).unwrap().write = offset_to_cursor(loc as u32);
		Ok(())
	}

	pub fn fwrite(&mut self, fd: usize, data: &[u8]) -> Result<usize, SfsError> {
		let file = self.open_file(fd)?;
		let inode_no = file.inode_no;
		let mut cursor = file.write;
		let mut written = 0usize;

		while written < data.len() {
			if cursor.byte_in_block as usize == BLOCK_BYTES {
				cursor.block += 1;
				cursor.byte_in_block = 0;
			}
			let addr = match self.ensure_block(inode_no, cursor.block) {
				Ok(addr) => addr,
				Err(SfsError::NoSpace) => break,
				Err(e) => return Err(e),
			};
			let space = BLOCK_BYTES - cursor.byte_in_block as usize;
			let chunk = space.min(data.len() - written);
			let mut buf = self.read_block(addr)?;
			buf[cursor.byte_in_block as usize..cursor.byte_in_block as usize + chunk]
				.copy_from_slice(&data[written..written + chunk]);
			self.write_block(addr, &buf)?;
			cursor.byte_in_block += chunk as u32;
			written += chunk;

			let current_logical_offset = cursor_to_offset(cursor);
			let inode = self.inodes.get_mut(inode_no).unwrap();
			if current_logical_offset as i32 > inode.size {
				inode.size = current_logical_offset as i32;
			}
		}

		self.open_files.get_mut(fd).unwrap().write = cursor;
		self.flush_inodes()?;
		self.flush_bitmaps()?;
		Ok(written)
	}

	pub fn fread(&mut self, fd: usize, out: &mut [u8]) -> Result<usize, SfsError> {
		let file = self.open_file(fd)?;
		let inode_no = file.inode_no;
		let size = self.inodes.get(inode_no).unwrap().size.max(0) as u32;
		let mut cursor = file.read;
		let available = size.saturating_sub(cursor_to_offset(cursor));
		let to_read = (out.len() as u32).min(available) as usize;

		let mut done = 0usize;
		while done < to_read {
			if cursor.byte_in_block as usize == BLOCK_BYTES {
				cursor.block += 1;
				cursor.byte_in_block = 0;
			}
			let inode = *self.inodes.get(inode_no).unwrap();
			let addr = self.block_ptr_at(&inode, cursor.block)?;
			if addr == 0 {
				return Err(SfsError::Internal("hole in block chain during read"));
			}
			let buf = self.read_block(addr)?;
			let space = BLOCK_BYTES - cursor.byte_in_block as usize;
			let chunk = space.min(to_read - done);
			out[done..done + chunk]
				.copy_from_slice(&buf[cursor.byte_in_block as usize..cursor.byte_in_block as usize + chunk]);
			cursor.byte_in_block += chunk as u32;
			done += chunk;
		}

		self.open_files.get_mut(fd).unwrap().read = cursor;
		Ok(done)
	}

	pub fn remove(&mut self, name: &str) -> Result<(), SfsError> {
		let slot = self.directories[0].find(name).ok_or(SfsError::NotFound)?;
		let inode_no = self.directories[0].entry(slot).inode_no;
		if self.open_files.is_open(inode_no) {
			return Err(SfsError::AlreadyOpen);
		}
		self.free_chain(inode_no)?;
		self.directories[0].clear_entry(slot);
		self.flush_inodes()?;
		self.flush_bitmaps()?;
		self.flush_directory(0)?;
		Ok(())
	}

	pub fn get_file_size(&self, name: &str) -> Result<i32, SfsError> {
		let slot = self.directories[0].find(name).ok_or(SfsError::NotFound)?;
		let inode_no = self.directories[0].entry(slot).inode_no;
		Ok(self.inodes.get(inode_no).unwrap().size.max(0))
	}

	/// Advance an internal cursor over the live directory, returning one
	/// name per call and wrapping back to the start once exhausted.
	pub fn get_next_file_name(&mut self) -> Option<String> {
		for idx in self.dir_cursor..DirectoryBlock::capacity() {
			let entry = self.directories[0].entry(idx);
			if !entry.is_free() {
				self.dir_cursor = idx + 1;
				return Some(entry.name().to_owned());
			}
		}
		self.dir_cursor = 0;
		None
	}

	pub fn close_disk(&mut self) -> Result<(), SfsError> {
		self.device.close_disk()
	}
}
