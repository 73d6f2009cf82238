use sfs::FileBackedDevice;
use sfs::Sfs;
use sfs::error::SfsError;
use sfs::geometry::BLOCK_BYTES;
use sfs::geometry::DIRECT_PTRS;
use sfs::geometry::MAX_FD;

fn fresh() -> (tempfile::TempDir, Sfs<FileBackedDevice>) {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("disk.img");
	let fs = Sfs::mkssfs(FileBackedDevice::new(), &path, true).unwrap();
	(dir, fs)
}

#[test]
fn write_then_read_roundtrips() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("hello.txt").unwrap();
	let written = fs.fwrite(fd, b"hello shadow world").unwrap();
	assert_eq!(written, b"hello shadow world".len());
	fs.frseek(fd, 0).unwrap();
	let mut buf = [0u8; 32];
	let read = fs.fread(fd, &mut buf).unwrap();
	assert_eq!(&buf[..read], b"hello shadow world");
	fs.fclose(fd).unwrap();
}

#[test]
fn read_and_write_cursors_are_independent() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("a.txt").unwrap();
	fs.fwrite(fd, b"0123456789").unwrap();
	fs.frseek(fd, 2).unwrap();
	let mut buf = [0u8; 3];
	fs.fread(fd, &mut buf).unwrap();
	assert_eq!(&buf, b"234");
	// the write cursor should still be at the end, appending rather than overwriting.
	fs.fwrite(fd, b"9").unwrap();
	assert_eq!(fs.get_file_size("a.txt").unwrap(), 11);
	fs.fclose(fd).unwrap();
}

#[test]
fn write_spanning_many_blocks_uses_the_indirect_pointer() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("big.bin").unwrap();
	let payload = vec![0xab; BLOCK_BYTES * (DIRECT_PTRS + 3)];
	let written = fs.fwrite(fd, &payload).unwrap();
	assert_eq!(written, payload.len());
	fs.frseek(fd, 0).unwrap();
	let mut back = vec![0u8; payload.len()];
	let read = fs.fread(fd, &mut back).unwrap();
	assert_eq!(read, payload.len());
	assert_eq!(back, payload);
	fs.fclose(fd).unwrap();
}

#[test]
fn end_of_file_accounting_handles_exact_block_multiples() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("exact.bin").unwrap();
	let payload = vec![0x11u8; BLOCK_BYTES];
	fs.fwrite(fd, &payload).unwrap();
	assert_eq!(fs.get_file_size("exact.bin").unwrap(), BLOCK_BYTES as i32);
	// writing one more byte must land in a fresh second block, not corrupt the first.
	fs.fwrite(fd, &[0x22]).unwrap();
	assert_eq!(fs.get_file_size("exact.bin").unwrap(), BLOCK_BYTES as i32 + 1);
	fs.fclose(fd).unwrap();
}

#[test]
fn remove_then_recreate_reuses_the_name() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("doomed.txt").unwrap();
	fs.fwrite(fd, b"temporary").unwrap();
	fs.fclose(fd).unwrap();
	fs.remove("doomed.txt").unwrap();
	assert!(matches!(fs.get_file_size("doomed.txt"), Err(SfsError::NotFound)));

	let fd = fs.fopen("doomed.txt").unwrap();
	assert_eq!(fs.get_file_size("doomed.txt").unwrap(), 0);
	fs.fclose(fd).unwrap();
}

#[test]
fn cannot_remove_or_restore_over_an_open_file() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("locked.txt").unwrap();
	assert!(matches!(fs.remove("locked.txt"), Err(SfsError::AlreadyOpen)));
	fs.fclose(fd).unwrap();
}

#[test]
fn reopening_an_open_file_fails() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("one.txt").unwrap();
	assert!(matches!(fs.fopen("one.txt"), Err(SfsError::AlreadyOpen)));
	fs.fclose(fd).unwrap();
	// after closing, reopening is fine again.
	let fd2 = fs.fopen("one.txt").unwrap();
	fs.fclose(fd2).unwrap();
}

#[test]
fn open_file_table_is_bounded() {
	let (_dir, mut fs) = fresh();
	let mut fds = Vec::new();
	for i in 0..MAX_FD {
		fds.push(fs.fopen(&format!("f{i}")).unwrap());
	}
	assert!(matches!(fs.fopen("one-too-many"), Err(SfsError::NoHandle)));
	for fd in fds {
		fs.fclose(fd).unwrap();
	}
}

#[test]
fn get_next_file_name_enumerates_and_wraps() {
	let (_dir, mut fs) = fresh();
	for name in ["a", "b", "c"] {
		fs.fopen(name).unwrap();
	}
	let mut seen = Vec::new();
	while let Some(name) = fs.get_next_file_name() {
		seen.push(name);
	}
	seen.sort();
	assert_eq!(seen, vec!["a", "b", "c"]);
	// the cursor wraps back to the start once exhausted.
	assert!(fs.get_next_file_name().is_some());
}

#[test]
fn commit_snapshots_and_restore_undoes_later_writes() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("doc.txt").unwrap();
	fs.fwrite(fd, b"version one").unwrap();
	fs.fclose(fd).unwrap();

	fs.commit().unwrap();

	let fd = fs.fopen("doc.txt").unwrap();
	fs.fwseek(fd, 0).unwrap();
	fs.fwrite(fd, b"version two is much longer than the first").unwrap();
	fs.fclose(fd).unwrap();
	assert_eq!(fs.get_file_size("doc.txt").unwrap() as usize, "version two is much longer than the first".len());

	fs.restore(1).unwrap();

	assert_eq!(fs.get_file_size("doc.txt").unwrap() as usize, "version one".len());
	let fd = fs.fopen("doc.txt").unwrap();
	let mut buf = [0u8; 32];
	let n = fs.fread(fd, &mut buf).unwrap();
	assert_eq!(&buf[..n], b"version one");
	fs.fclose(fd).unwrap();
}

#[test]
fn restoring_a_shadow_does_not_mutate_it() {
	let (_dir, mut fs) = fresh();
	let fd = fs.fopen("doc.txt").unwrap();
	fs.fwrite(fd, b"snapshot content").unwrap();
	fs.fclose(fd).unwrap();
	fs.commit().unwrap();

	fs.restore(1).unwrap();
	let fd = fs.fopen("doc.txt").unwrap();
	fs.fwseek(fd, 0).unwrap();
	fs.fwrite(fd, b"mutated after restore").unwrap();
	fs.fclose(fd).unwrap();

	// restoring again from the same shadow must still produce the original bytes:
	// the first restore must not have aliased the shadow's blocks.
	fs.restore(1).unwrap();
	assert_eq!(fs.get_file_size("doc.txt").unwrap() as usize, "snapshot content".len());
}

#[test]
fn bad_arguments_are_rejected() {
	let (_dir, mut fs) = fresh();
	assert!(matches!(fs.fopen(""), Err(SfsError::BadArg(_))));
	assert!(matches!(fs.fopen(&"x".repeat(64)), Err(SfsError::BadArg(_))));
	assert!(matches!(fs.fclose(999), Err(SfsError::BadArg(_))));
}
