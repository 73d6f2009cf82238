//! Format or inspect a shadow file system image.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use sfs::FileBackedDevice;
use sfs::Geometry;
use sfs::Sfs;

#[derive(Default)]
struct Args {
	path: Option<PathBuf>,
	fresh: bool,
}

fn print_usage() {
	eprintln!("mksfs: make or inspect a shadow file system image");
	eprintln!();
	eprintln!("Usage:");
	eprintln!("\tmksfs [-f] <image-path>");
	eprintln!();
	eprintln!("\t-f, --fresh\tcreate a new image, overwriting any existing file");
}

fn parse_args() -> Args {
	let mut args = Args::default();
	for arg in env::args().skip(1) {
		match arg.as_str() {
			"-f" | "--fresh" => args.fresh = true,
			"-h" | "--help" => {
				print_usage();
				exit(0);
			}
			other => args.path = Some(PathBuf::from(other)),
		}
	}
	args
}

fn main() {
	env_logger::init();
	let args = parse_args();

	let Some(path) = args.path else {
		print_usage();
		exit(1);
	};

	let device = FileBackedDevice::new();
	let mut fs = match Sfs::mkssfs(device, &path, args.fresh) {
		Ok(fs) => fs,
		Err(e) => {
			eprintln!("mksfs: {e}");
			exit(1);
		}
	};

	let geometry = Geometry::default();
	println!("image:        {}", path.display());
	println!("block size:   {} bytes", geometry.block_bytes);
	println!("blocks:       {}", geometry.num_blocks);
	println!("inodes:       {}", geometry.num_inodes);
	println!("shadow slots: {}", geometry.shadow_slots);

	if let Err(e) = fs.close_disk() {
		eprintln!("mksfs: {e}");
		exit(1);
	}
}
