//! Fixed-width inode record: file type, size, parent link, and the list of
//! data blocks holding the file's content.
//!
//! An inode never carries an owning reference back to its `SuperBlock`.
//! Operations that need the bitmap allocator or the backing disk (`mkdir`,
//! `add_dir_entry`, `alloc_dblocks`) take `&mut SuperBlock` explicitly
//! instead, which is why `SuperBlock` is the one that takes an inode out of
//! its cache, runs the operation, and puts it back (see
//! `SuperBlock::with_inode_mut`).

use crate::block::BLOCK_SIZE;
use crate::errno;
use crate::superblock::SuperBlock;

/// `256 - 5*4 = 236 bytes -> 236 / 4 = 59 data block ids.`
pub const MAX_DBLOCKS: usize = 59;
/// `block_ids` slots that are not in use hold this sentinel. Must stay
/// negative: inode storage on disk is not guaranteed to be nullified on
/// removal, and positive ids are reserved for in-use data blocks.
const FREE_DBLOCK_ID: i32 = -1;
pub const INODE_SIZE: usize = 5 * 4 + MAX_DBLOCKS * 4;

/// A directory entry's name may be at most this many bytes, so that the
/// 32-byte entry layout (4 + 1 + 27) holds.
pub const MAX_FNAME_LEN: usize = 27;
pub const DIR_ENTRY_SIZE: usize = 32;

// https://github.com/torvalds/linux/blob/fe78e02600f83d81e55f6fc352d82c4f264a2901/include/linux/fs.h#L674
// Also see: `man inode`.
//
// The filename an inode is reached by is not part of the inode itself;
// names live in the directory entries of the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
	pub ino: u32,
	pub mode: u32,
	pub size: u32,
	/// Number of directory entries ever written. Monotonic: there are no
	/// tombstones, so this never decreases.
	pub num_f_in_dir: u32,
	/// Parent directory's inode number. `None` until explicitly linked; the
	/// root inode is its own parent.
	pub p_ino: Option<u32>,
	/// Data-zone-relative ids of this inode's data blocks, in allocation
	/// order.
	pub blocks: Vec<u32>,
}

impl Inode {
	pub fn new(ino: u32) -> Self {
		Self { ino, mode: 0, size: 0, num_f_in_dir: 0, p_ino: None, blocks: Vec::new() }
	}

	pub fn is_dir(&self) -> bool {
		self.mode as libc::mode_t & libc::S_IFMT == libc::S_IFDIR
	}

	pub fn is_reg(&self) -> bool {
		self.mode as libc::mode_t & libc::S_IFMT == libc::S_IFREG
	}

	/// Serializes the inode to its on-disk 256-byte record.
	pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
		assert!(self.p_ino.is_some(), "forgot to set p_ino on inode");
		assert!(self.blocks.len() <= MAX_DBLOCKS, "max number of data blocks exceeded");

		let mut buf = [0u8; INODE_SIZE];
		buf[0..4].copy_from_slice(&self.ino.to_be_bytes());
		buf[4..8].copy_from_slice(&self.mode.to_be_bytes());
		buf[8..12].copy_from_slice(&self.size.to_be_bytes());
		buf[12..16].copy_from_slice(&self.num_f_in_dir.to_be_bytes());
		buf[16..20].copy_from_slice(&self.p_ino.unwrap().to_be_bytes());
		for i in 0..MAX_DBLOCKS {
			let id = self.blocks.get(i).map_or(FREE_DBLOCK_ID, |&id| id as i32);
			let offset = 20 + i * 4;
			buf[offset..offset + 4].copy_from_slice(&id.to_be_bytes());
		}
		buf
	}

	/// Deserializes an inode record. `block_ids` equal to the free sentinel
	/// are dropped.
	pub fn from_bytes(buf: &[u8]) -> Self {
		assert_eq!(buf.len(), INODE_SIZE);

		let ino = u32::from_be_bytes(buf[0..4].try_into().unwrap());
		let mode = u32::from_be_bytes(buf[4..8].try_into().unwrap());
		let size = u32::from_be_bytes(buf[8..12].try_into().unwrap());
		let num_f_in_dir = u32::from_be_bytes(buf[12..16].try_into().unwrap());
		let p_ino = u32::from_be_bytes(buf[16..20].try_into().unwrap());
		let blocks = (0..MAX_DBLOCKS)
			.map(|i| {
				let offset = 20 + i * 4;
				i32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap())
			})
			.filter(|&id| id != FREE_DBLOCK_ID)
			.map(|id| id as u32)
			.collect();

		Self { ino, mode, size, num_f_in_dir, p_ino: Some(p_ino), blocks }
	}

	/// Looks up `pathname`, recursively resolving path components against
	/// directory entries.
	///
	/// Returns:
	/// - `(0, inode)`: pathname was found.
	/// - `(-1, inode)`: parent directory found, final component absent.
	/// - `(-2, inode)`: some intermediate directory component is missing;
	///   `inode` is the deepest existing ancestor.
	/// - `(-ENODEV, root)`: pathname is not rooted at `/`.
	/// - `(-EINVAL, root)`: a path component violates the naming rules.
	pub fn lookup(pathname: &str, sb: &SuperBlock) -> (i32, Inode) {
		if !pathname.starts_with('/') {
			return (errno::ENODEV, sb.root_inode());
		}
		if pathname == "/" {
			return (0, sb.root_inode());
		}

		let components: Vec<&str> = pathname.trim_start_matches('/').split('/').collect();
		if components.iter().any(|c| !is_valid_path_component(c)) {
			return (errno::EINVAL, sb.root_inode());
		}

		let mut p_inode = sb.root_inode();
		for (i, component) in components.iter().enumerate() {
			let mut found = None;
			'search: for &block_id in &p_inode.blocks {
				let data = sb.dzone_block(block_id).read_all(sb.disk());
				for (ino, name) in iter_dir_entries(&data) {
					if ino == 0 {
						break 'search;
					}
					if name == component.as_bytes() {
						found = Some(ino);
						break 'search;
					}
				}
			}

			match found {
				Some(ino) => p_inode = sb.inode_by_number(ino),
				None => {
					return if i + 1 == components.len() { (-1, p_inode) } else { (-2, p_inode) };
				},
			}
		}

		(0, p_inode)
	}

	/// Turns the receiver into a regular file linked under `p_ino`.
	pub fn create(&mut self, p_ino: u32, mode: u32) -> i32 {
		assert!(!self.is_dir(), "can't change existing inode into regular file");
		self.p_ino = Some(p_ino);
		self.mode = libc::S_IFREG | (mode & 0o777);
		0
	}

	/// Turns the receiver into a directory: allocates its first data block
	/// and seeds it with `.` and `..`.
	pub fn mkdir(&mut self, sb: &mut SuperBlock, mode: u32) -> i32 {
		assert!(!self.is_reg(), "can't change existing inode into directory");
		assert!(self.p_ino.is_some(), "forgot to set p_ino on inode");

		self.mode = libc::S_IFDIR | (mode & 0o777);

		let err = self.alloc_dblocks(sb, 1);
		if err != 0 {
			return err;
		}
		self.size = BLOCK_SIZE as u32;

		let self_ino = self.ino;
		let parent_ino = self.p_ino.unwrap();
		self.add_dir_entry(sb, ".", self_ino);
		self.add_dir_entry(sb, "..", parent_ino);
		0
	}

	/// Appends one directory entry at slot `num_f_in_dir`, growing the
	/// directory with a new block if the current one is full.
	pub fn add_dir_entry(&mut self, sb: &mut SuperBlock, fname: &str, child_ino: u32) -> i32 {
		assert!(self.is_dir(), "add_dir_entry requires a directory inode");

		if !is_valid_path_component(fname) {
			return errno::EINVAL;
		}

		let (b, offset) = (
			(self.num_f_in_dir as usize * DIR_ENTRY_SIZE) / BLOCK_SIZE,
			(self.num_f_in_dir as usize * DIR_ENTRY_SIZE) % BLOCK_SIZE,
		);
		if b >= self.blocks.len() {
			let err = self.alloc_dblocks(sb, 1);
			if err != 0 {
				return err;
			}
		}

		let entry = encode_dir_entry(child_ino, fname);
		let block = sb.dzone_block(self.blocks[b]);
		block.write(sb.disk(), offset, &entry);

		self.num_f_in_dir += 1;
		0
	}

	/// Requests `count` new data blocks from `sb` and appends them.
	pub fn alloc_dblocks(&mut self, sb: &mut SuperBlock, count: usize) -> i32 {
		if count > MAX_DBLOCKS - self.blocks.len() {
			return errno::ENOSPC;
		}

		let dblocks = sb.alloc_dblocks(count);
		if dblocks.is_empty() && count > 0 {
			return errno::ENOSPC;
		}
		self.blocks.extend(&dblocks);

		if self.is_dir() {
			self.size += (count * BLOCK_SIZE) as u32;
		}
		0
	}
}

/// Generator over `(ino, name)` pairs in a directory data block.
pub fn iter_dir_entries(data: &[u8]) -> impl Iterator<Item = (u32, &[u8])> {
	data.chunks(DIR_ENTRY_SIZE).map(|entry| {
		let ino = u32::from_be_bytes(entry[0..4].try_into().unwrap());
		let name_len = entry[4] as usize;
		(ino, &entry[5..5 + name_len])
	})
}

fn encode_dir_entry(ino: u32, name: &str) -> [u8; DIR_ENTRY_SIZE] {
	let name = name.as_bytes();
	assert!(name.len() <= MAX_FNAME_LEN);

	let mut buf = [0u8; DIR_ENTRY_SIZE];
	buf[0..4].copy_from_slice(&ino.to_be_bytes());
	buf[4] = name.len() as u8;
	buf[5..5 + name.len()].copy_from_slice(name);
	buf
}

fn is_valid_path_component(name: &str) -> bool {
	name.is_ascii() && !name.is_empty() && name.len() <= MAX_FNAME_LEN && !name.contains('/')
}
