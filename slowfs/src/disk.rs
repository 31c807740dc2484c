//! File-backed block device.
//!
//! To mimic persisting data, the disk's sectors live in a regular file on
//! the host filesystem. The kernel would instead talk to a device driver
//! that writes to the registers of the physical block device.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::sector::{Sector, SECTOR_SIZE};

pub struct Disk {
	num_sectors: u32,
	// Single-threaded and synchronous: a RefCell gives interior mutability
	// for read_sector/write_sector without needing a lock.
	file: RefCell<File>,
}

impl Disk {
	/// Creates a brand-new disk image of `size` bytes at `pathname`,
	/// truncating any existing file. Used by the format tool before it
	/// calls `SuperBlock::format`.
	pub fn create(pathname: &Path, size: u64) -> io::Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(pathname)?;
		file.set_len(size)?;
		Ok(Self::from_file(file, size))
	}

	/// Opens an existing disk image. `size` determines how many sectors are
	/// exposed; bytes beyond `size` are invisible even if the file is
	/// larger.
	pub fn open(pathname: &Path, size: u64) -> io::Result<Self> {
		if !pathname.exists() {
			return Err(io::Error::new(io::ErrorKind::NotFound, "disk image does not exist"));
		}
		let file = OpenOptions::new().read(true).write(true).open(pathname)?;
		Ok(Self::from_file(file, size))
	}

	fn from_file(file: File, size: u64) -> Self {
		Self {
			num_sectors: (size / SECTOR_SIZE as u64) as u32,
			file: RefCell::new(file),
		}
	}

	pub fn num_sectors(&self) -> u32 {
		self.num_sectors
	}

	/// Reads a sector from disk into memory.
	pub fn read_sector(&self, id: u32) -> Sector {
		assert!(id < self.num_sectors, "sector does not exist on this disk");

		let offset = id as u64 * SECTOR_SIZE as u64;
		let mut buf = [0u8; SECTOR_SIZE];
		let mut file = self.file.borrow_mut();
		file.seek(SeekFrom::Start(offset)).expect("seek on disk backing file");
		file.read_exact(&mut buf).expect("read sector from disk backing file");
		Sector::from_bytes(id, buf)
	}

	/// Writes a sector to disk. Disks expect data in whole sectors only.
	pub fn write_sector(&self, sector: &Sector) {
		assert!(sector.id < self.num_sectors, "sector does not exist on this disk");

		let offset = sector.id as u64 * SECTOR_SIZE as u64;
		let mut file = self.file.borrow_mut();
		file.seek(SeekFrom::Start(offset)).expect("seek on disk backing file");
		file.write_all(sector.as_bytes()).expect("write sector to disk backing file");
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn temp_disk_path(tag: &str) -> std::path::PathBuf {
		std::env::temp_dir().join(format!("slowfs-disk-test-{tag}-{}", std::process::id()))
	}

	#[test]
	fn write_then_read_round_trips() {
		let path = temp_disk_path("roundtrip");
		let disk = Disk::create(&path, 8 * SECTOR_SIZE as u64).unwrap();

		let mut sector = Sector::new(2);
		sector.write_slice(0, b"hello disk");
		disk.write_sector(&sector);

		let read_back = disk.read_sector(2);
		assert_eq!(read_back.slice(0, 10), b"hello disk");

		let _ = std::fs::remove_file(&path);
	}

	#[test]
	#[should_panic]
	fn read_out_of_range_panics() {
		let path = temp_disk_path("oob");
		let disk = Disk::create(&path, 2 * SECTOR_SIZE as u64).unwrap();
		let _ = disk.read_sector(5);
		let _ = std::fs::remove_file(&path);
	}
}
