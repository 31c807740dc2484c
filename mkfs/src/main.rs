//! The `mkfs` tool formats a device or disk image with a slowfs filesystem.
//!
//! This is the "format tool" external collaborator the core filesystem
//! describes: it owns the device path and the desired size, calls
//! `SuperBlock::format`, and flushes everything with a single `sync_fs`
//! call. The core itself never decides when to format a device.

use std::path::PathBuf;
use std::process::exit;

use slowfs::block::BLOCK_SIZE;
use slowfs::sector::SECTOR_SIZE;
use slowfs::superblock::{SuperBlock, FS_TYPE};
use slowfs::Disk;
use utils::prompt::prompt;
use utils::util::ByteSize;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help.
	help: bool,

	/// The path to the device or image file to format.
	device_path: Option<PathBuf>,

	/// Number of `BLOCK_SIZE` blocks to create the image with. If absent,
	/// `device_path` must already exist and its current size is used.
	num_blocks: Option<u64>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = std::env::args();

	args.prog = iter.next().unwrap_or("mkfs".to_owned());

	for arg in iter {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			_ if args.device_path.is_none() => args.device_path = Some(PathBuf::from(arg)),
			_ => args.num_blocks = arg.parse().ok(),
		}
	}

	args
}

fn print_usage(prog: &str) {
	println!("Usage: {prog} [-h] <device> [blocks]");
	println!();
	println!("Formats <device> with a slowfs filesystem.");
	println!("If [blocks] is given, <device> is created (or truncated) to that many");
	println!("{BLOCK_SIZE}-byte blocks first. Otherwise <device> must already exist.");
}

fn main() {
	let args = parse_args();

	if args.help {
		print_usage(&args.prog);
		exit(0);
	}

	let device_path = args.device_path.unwrap_or_else(|| {
		print_usage(&args.prog);
		exit(1);
	});

	let disk = match args.num_blocks {
		Some(num_blocks) => {
			let size = num_blocks * BLOCK_SIZE as u64;
			Disk::create(&device_path, size).unwrap_or_else(|e| {
				utils::error(&args.prog, format!("{}: {e}", device_path.display()))
			})
		},
		None => {
			let sectors = utils::disk::get_disk_size(&device_path).unwrap_or_else(|e| {
				utils::error(&args.prog, format!("{}: {e}", device_path.display()))
			});
			Disk::open(&device_path, sectors * SECTOR_SIZE as u64).unwrap_or_else(|e| {
				utils::error(&args.prog, format!("{}: {e}", device_path.display()))
			})
		},
	};

	if already_has_filesystem(&disk) {
		println!("{}: {} already contains a slowfs filesystem", args.prog, device_path.display());
		let confirm = prompt(Some("Proceed and overwrite it anyway? (y/N) "), false)
			.map(|s| s.eq_ignore_ascii_case("y"))
			.unwrap_or(false);
		if !confirm {
			eprintln!("{}: aborted", args.prog);
			exit(1);
		}
	}

	let num_blocks = disk.num_sectors() as u64 * SECTOR_SIZE as u64 / BLOCK_SIZE as u64;
	let sb = SuperBlock::format(disk).unwrap_or_else(|e| utils::error(&args.prog, e));
	sb.sync_fs();

	println!(
		"{}: formatted {} ({num_blocks} blocks, {})",
		args.prog,
		device_path.display(),
		ByteSize(num_blocks * BLOCK_SIZE as u64)
	);
}

/// Peeks at the magic byte without going through `SuperBlock::open`, which
/// would fail outright on an unformatted device.
fn already_has_filesystem(disk: &Disk) -> bool {
	disk.num_sectors() as usize >= BLOCK_SIZE / SECTOR_SIZE && disk.read_sector(0).get(0) == FS_TYPE
}
