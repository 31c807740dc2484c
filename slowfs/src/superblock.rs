//! Root of the on-disk layout: format, open, sync.
//!
//! Layout (all in blocks): block 0 is metadata, block 1 is the inode
//! bitmap, block 2 is the data-block bitmap, then the inode zone, then the
//! data zone. See the crate-level docs in `lib.rs` for the full picture.

use std::collections::HashMap;

use crate::block::{Block, BLOCK_SIZE};
use crate::disk::Disk;
use crate::inode::{Inode, INODE_SIZE};

const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / crate::sector::SECTOR_SIZE;
const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// Superblock identifier; written to byte 0 of block 0. Used to check
/// whether a disk image was ever formatted with this filesystem.
pub const FS_TYPE: u8 = 137;

use crate::bitmap::BitMap;

pub struct SuperBlock {
	disk: Disk,
	izone_size: usize,
	dzone_size: usize,
	imap: BitMap,
	dmap: BitMap,
	inodes: HashMap<u32, Inode>,
	root_ino: u32,
}

impl SuperBlock {
	/// Builds the on-disk structures from scratch: empty bitmaps, inode 0
	/// reserved, and a root directory inode that is its own parent.
	pub fn format(disk: Disk) -> Result<Self, &'static str> {
		let num_blocks = disk.num_sectors() as usize / SECTORS_PER_BLOCK;
		if num_blocks < 5 {
			// At least one block for each of: superblock, imap, dmap, izone, dzone.
			return Err("disk too small to fit filesystem");
		}

		let n = num_blocks - 3;
		let izone_size = (n / 3).max(1);
		let dzone_size = n - izone_size;

		let mut sb = Self {
			disk,
			izone_size,
			dzone_size,
			imap: BitMap::new(BLOCK_SIZE),
			dmap: BitMap::new(BLOCK_SIZE),
			inodes: HashMap::new(),
			root_ino: 0,
		};

		// Hacky but deliberate: always keep inode 0 allocated. Blocks are
		// nullified on allocation, so a zero ino can be treated as the
		// "no entry" sentinel in directory content.
		sb.imap.alloc(0);

		let root_ino = sb.alloc_inode().ok_or("disk too small to fit inode table")?;
		let mut root = sb.inodes.remove(&root_ino).unwrap();
		root.p_ino = Some(root_ino);
		let err = root.mkdir(&mut sb, 0o555);
		assert_eq!(err, 0, "formatting a freshly sized disk must have room for the root dir");
		sb.inodes.insert(root_ino, root);
		sb.root_ino = root_ino;

		Ok(sb)
	}

	/// Loads the on-disk structures, failing if the magic byte is absent.
	pub fn open(disk: Disk) -> Result<Self, &'static str> {
		let num_blocks = disk.num_sectors() as usize / SECTORS_PER_BLOCK;
		if num_blocks < 5 {
			return Err("disk too small to fit filesystem");
		}
		if Block::new(0).read_byte(&disk, 0) != FS_TYPE {
			return Err("disk does not contain a slowfs filesystem");
		}

		let n = num_blocks - 3;
		let izone_size = (n / 3).max(1);
		let dzone_size = n - izone_size;

		let imap = BitMap::from_bytes(&Block::new(SECTORS_PER_BLOCK as u32).read_all(&disk));
		let dmap =
			BitMap::from_bytes(&Block::new(2 * SECTORS_PER_BLOCK as u32).read_all(&disk));

		let mut sb =
			Self { disk, izone_size, dzone_size, imap, dmap, inodes: HashMap::new(), root_ino: 1 };

		for ino in sb.imap.iter().filter(|&i| i != 0) {
			let inode = sb.read_inode_from_disk(ino);
			sb.inodes.insert(ino, inode);
		}
		assert!(sb.inodes.contains_key(&sb.root_ino), "root inode (ino=1) missing from imap");

		Ok(sb)
	}

	pub fn disk(&self) -> &Disk {
		&self.disk
	}

	pub fn root_inode(&self) -> Inode {
		self.inodes.get(&self.root_ino).expect("root inode always cached").clone()
	}

	/// Returns a copy of the cached inode, or reads it from the inode zone
	/// if it isn't cached. Never inserts the result into the cache itself.
	pub fn inode_by_number(&self, ino: u32) -> Inode {
		match self.inodes.get(&ino) {
			Some(inode) => inode.clone(),
			None => self.read_inode_from_disk(ino),
		}
	}

	pub fn is_cached(&self, ino: u32) -> bool {
		self.inodes.contains_key(&ino)
	}

	pub fn cache_inode(&mut self, inode: Inode) {
		self.inodes.insert(inode.ino, inode);
	}

	/// Takes a cached inode out, runs `f` on it with mutable access to both
	/// the inode and the rest of the superblock, then puts it back.
	///
	/// This is the one place the borrow-checker conflict of "an inode
	/// method that also needs `&mut SuperBlock`, while that same inode
	/// lives inside `SuperBlock.inodes`" gets resolved: by temporarily
	/// owning the inode outside the map, `self` and the inode are two
	/// independent mutable borrows again.
	pub fn with_inode_mut<F>(&mut self, ino: u32, f: F) -> i32
	where
		F: FnOnce(&mut Inode, &mut SuperBlock) -> i32,
	{
		let mut inode = self.inodes.remove(&ino).expect("inode not cached");
		let result = f(&mut inode, self);
		self.inodes.insert(ino, inode);
		result
	}

	/// Allocates a fresh inode, returning its number, or `None` if the
	/// inode table is exhausted.
	pub fn alloc_inode(&mut self) -> Option<u32> {
		let i = self.imap.next_free()?;
		if i as usize >= self.izone_size * INODES_PER_BLOCK {
			// No free inode slots left, even though the bitmap has room.
			return None;
		}
		self.imap.alloc(i);
		self.inodes.insert(i, Inode::new(i));
		Some(i)
	}

	/// Persists a single inode to its slot in the inode zone.
	pub fn write_inode(&self, inode: &Inode) {
		let (b, slot) = (inode.ino as usize / INODES_PER_BLOCK, inode.ino as usize % INODES_PER_BLOCK);
		self.izone_block(b).write(&self.disk, slot * INODE_SIZE, &inode.to_bytes());
	}

	/// Persists the currently cached version of `ino`, if any.
	pub fn sync_inode(&self, ino: u32) {
		if let Some(inode) = self.inodes.get(&ino) {
			self.write_inode(inode);
		}
	}

	/// Writes fs_type, imap, dmap and every cached inode to disk. The only
	/// durability boundary; callers must invoke this at umount.
	pub fn sync_fs(&self) -> i32 {
		self.block_at(0).write(&self.disk, 0, &[FS_TYPE]);
		self.block_at(1).write(&self.disk, 0, self.imap.as_bytes());
		self.block_at(2).write(&self.disk, 0, self.dmap.as_bytes());
		for inode in self.inodes.values() {
			self.write_inode(inode);
		}
		0
	}

	/// Allocates `count` data blocks, zero-filling each. Returns an empty
	/// vector (after rolling back any partial allocation) if `count`
	/// blocks were not all available.
	pub fn alloc_dblocks(&mut self, count: usize) -> Vec<u32> {
		let mut taken = Vec::with_capacity(count);
		for _ in 0..count {
			match self.dmap.next_free() {
				Some(i) if (i as usize) < self.dzone_size => {
					self.dmap.alloc(i);
					taken.push(i);
				},
				_ => break,
			}
		}

		if taken.len() == count {
			for &id in &taken {
				self.dzone_block(id).write(&self.disk, 0, &[0u8; BLOCK_SIZE]);
			}
			taken
		} else {
			for &id in &taken {
				self.dmap.free(id);
			}
			Vec::new()
		}
	}

	pub fn dealloc_dblocks(&mut self, ids: &[u32]) {
		for &id in ids {
			self.dmap.free(id);
		}
	}

	/// Deserializes `ino`'s record straight out of the inode zone, without
	/// touching the cache.
	pub fn read_inode_from_disk(&self, ino: u32) -> Inode {
		let (b, slot) = (ino as usize / INODES_PER_BLOCK, ino as usize % INODES_PER_BLOCK);
		let data = self.izone_block(b).read_slice(&self.disk, slot * INODE_SIZE, (slot + 1) * INODE_SIZE);
		Inode::from_bytes(&data)
	}

	fn block_at(&self, absolute_block: usize) -> Block {
		Block::new(absolute_block as u32 * SECTORS_PER_BLOCK as u32)
	}

	fn izone_block(&self, b: usize) -> Block {
		assert!(b < self.izone_size, "inode block index out of range");
		self.block_at(3 + b)
	}

	/// Resolves a data-zone-relative block id to its `Block`.
	pub fn dzone_block(&self, id: u32) -> Block {
		assert!((id as usize) < self.dzone_size, "data block id out of range");
		self.block_at(3 + self.izone_size + id as usize)
	}

	pub fn max_inodes(&self) -> usize {
		(self.imap.size() * 8).min(self.izone_size * INODES_PER_BLOCK)
	}

	/// Decodes `ino`'s directory content into `(ino, name)` pairs, stopping
	/// at the first empty-sentinel entry. Ambient helper for anything that
	/// will eventually want to list a directory (a FUSE `readdir`, an `ls`);
	/// not part of the on-disk format itself, just a read of it.
	pub fn read_dir(&self, ino: u32) -> Vec<(u32, String)> {
		let inode = self.inode_by_number(ino);
		assert!(inode.is_dir(), "read_dir requires a directory inode");

		let mut entries = Vec::new();
		'blocks: for &block_id in &inode.blocks {
			let data = self.dzone_block(block_id).read_all(&self.disk);
			for (child_ino, name) in crate::inode::iter_dir_entries(&data) {
				if child_ino == 0 {
					break 'blocks;
				}
				entries.push((child_ino, String::from_utf8_lossy(name).into_owned()));
			}
		}
		entries
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn temp_disk(tag: &str, num_blocks: u64) -> Disk {
		let path =
			std::env::temp_dir().join(format!("slowfs-super-test-{tag}-{}", std::process::id()));
		Disk::create(&path, num_blocks * BLOCK_SIZE as u64).unwrap()
	}

	#[test]
	fn format_reserves_inode_zero_and_creates_root() {
		let sb = SuperBlock::format(temp_disk("format", 20)).unwrap();
		assert!(!sb.is_cached(0));
		let root = sb.root_inode();
		assert!(root.is_dir());
		assert_eq!(root.p_ino, Some(root.ino));
	}

	#[test]
	fn alloc_dblocks_zero_fills() {
		let mut sb = SuperBlock::format(temp_disk("zerofill", 20)).unwrap();
		let ids = sb.alloc_dblocks(1);
		assert_eq!(ids.len(), 1);
		let data = sb.dzone_block(ids[0]).read_all(sb.disk());
		assert!(data.iter().all(|&b| b == 0));
	}

	#[test]
	fn too_small_disk_rejected() {
		assert!(SuperBlock::format(temp_disk("tiny", 3)).is_err());
	}

	#[test]
	fn reserved_inode_zero_is_never_allocated() {
		let mut sb = SuperBlock::format(temp_disk("reserved", 20)).unwrap();
		for _ in 0..10 {
			let ino = sb.alloc_inode().unwrap();
			assert_ne!(ino, 0);
		}
	}

	#[test]
	fn read_dir_lists_dot_and_dotdot_for_fresh_root() {
		let sb = SuperBlock::format(temp_disk("readdir", 20)).unwrap();
		let root_ino = sb.root_inode().ino;
		let entries = sb.read_dir(root_ino);
		assert_eq!(entries, vec![(root_ino, ".".to_string()), (root_ino, "..".to_string())]);
	}

	#[test]
	fn open_after_format_round_trips_fs_type() {
		let path = std::env::temp_dir()
			.join(format!("slowfs-super-test-roundtrip-{}", std::process::id()));
		let disk = Disk::create(&path, 20 * BLOCK_SIZE as u64).unwrap();
		let sb = SuperBlock::format(disk).unwrap();
		sb.sync_fs();
		drop(sb);

		let disk = Disk::open(&path, 20 * BLOCK_SIZE as u64).unwrap();
		let sb = SuperBlock::open(disk).unwrap();
		assert!(sb.root_inode().is_dir());
		let _ = std::fs::remove_file(&path);
	}
}
