//! Virtual filesystem: the mount table and the syscall-like surface
//! (open/close/read/write/seek/mkdir/mount/umount/sysfs) that userspace
//! talks to.

use std::collections::HashMap;

use crate::disk::Disk;
use crate::errno;
use crate::file::{File, O_CREAT, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY};
use crate::inode::Inode;
use crate::process::Process;
use crate::superblock::SuperBlock;

pub struct Vfs {
	mounts: HashMap<String, SuperBlock>,
}

impl Vfs {
	pub fn new() -> Self {
		Self { mounts: HashMap::new() }
	}

	/// `sysfs(2)`: deprecated even on real Linux, but it's the one way to
	/// inspect the current mount table.
	pub fn sysfs(&self) -> Vec<(&str, &SuperBlock)> {
		self.mounts.iter().map(|(mp, sb)| (mp.as_str(), sb)).collect()
	}

	/// `mount(2)`. Panics if `mountpoint` is already in use or `disk` does
	/// not hold a valid slowfs image — both are host misconfiguration, not
	/// conditions a userspace caller can recover from via an errno.
	pub fn mount(&mut self, disk: Disk, mountpoint: &str) -> i32 {
		assert!(!self.mounts.contains_key(mountpoint), "mountpoint already in use: {mountpoint}");
		let sb = SuperBlock::open(disk).expect("mount: not a valid slowfs image");
		self.mounts.insert(mountpoint.to_string(), sb);
		0
	}

	/// `umount(2)`: flushes the superblock and drops it from the mount
	/// table. Panics if nothing is mounted there.
	pub fn umount(&mut self, mountpoint: &str) -> i32 {
		let sb =
			self.mounts.remove(mountpoint).unwrap_or_else(|| panic!("mountpoint not in use: {mountpoint}"));
		sb.sync_fs()
	}

	/// `open(2)`.
	pub fn open(&mut self, pathname: &str, flags: i32, mode: u32, proc: &mut Process) -> i32 {
		if is_dir_mode(mode) && flags & O_CREAT != 0 {
			return errno::EINVAL;
		}
		if is_reg_mode(mode) && pathname.ends_with('/') {
			return errno::EINVAL;
		}

		let Some((mountpoint, sb, relative)) = self.superblock_mut(pathname) else {
			return errno::ENODEV;
		};

		let (status, looked_up) = Inode::lookup(&relative, sb);
		let ino = match status {
			0 if flags & O_CREAT != 0 && flags & O_EXCL != 0 => return errno::EEXIST,
			0 => looked_up.ino,
			-1 => {
				if flags & O_CREAT == 0 {
					return errno::ENOENT;
				}
				let p_ino = looked_up.ino;
				let Some(new_ino) = sb.alloc_inode() else {
					return errno::EDQUOT;
				};
				sb.with_inode_mut(new_ino, |child, _sb| {
					child.create(p_ino, mode);
					0
				});
				let fname = basename(&relative);
				sb.with_inode_mut(p_ino, |parent, sb| parent.add_dir_entry(sb, &fname, new_ino));
				new_ino
			},
			-2 => return errno::ENOENT,
			other => return other,
		};

		let Some(fd) = proc.oft().iter().position(|f| f.is_none()) else {
			return errno::EMFILE;
		};

		if flags & O_TRUNC != 0 && flags & (O_RDWR | O_WRONLY) != 0 {
			let current = sb.inode_by_number(ino);
			if current.is_reg() {
				sb.dealloc_dblocks(&current.blocks);
				sb.with_inode_mut(ino, |inode, _sb| {
					inode.blocks.clear();
					inode.size = 0;
					0
				});
			}
		}

		proc.oft_mut()[fd] = Some(File::new(ino, mountpoint, flags));
		fd as i32
	}

	/// `close(2)`.
	pub fn close(&mut self, fd: i32, proc: &mut Process) -> i32 {
		let Some(file) = valid_slot(proc, fd) else {
			return errno::EBADF;
		};
		let file = proc.oft_mut()[fd as usize].take().unwrap();
		let _ = file.flush();

		if let Some(sb) = self.mounts.get(&file.mountpoint) {
			sb.write_inode(&sb.inode_by_number(file.ino));
		}
		0
	}

	/// `write(2)`.
	pub fn write(&mut self, fd: i32, buf: &[u8], proc: &mut Process) -> i32 {
		if valid_slot(proc, fd).is_none() {
			return errno::EBADF;
		}
		let file = proc.oft_mut()[fd as usize].as_mut().unwrap();
		let Some(sb) = self.mounts.get_mut(&file.mountpoint) else {
			return errno::EBADF;
		};
		file.write(sb, buf)
	}

	/// `read(2)`.
	pub fn read(&mut self, fd: i32, count: usize, proc: &mut Process) -> Result<Vec<u8>, i32> {
		if valid_slot(proc, fd).is_none() {
			return Err(errno::EBADF);
		}
		let file = proc.oft_mut()[fd as usize].as_mut().unwrap();
		let Some(sb) = self.mounts.get(&file.mountpoint) else {
			return Err(errno::EBADF);
		};
		file.read(sb, count)
	}

	/// `lseek(2)`.
	pub fn seek(&mut self, fd: i32, offset: u32, proc: &mut Process) -> i32 {
		if valid_slot(proc, fd).is_none() {
			return errno::EBADF;
		}
		let file = proc.oft_mut()[fd as usize].as_mut().unwrap();
		let Some(sb) = self.mounts.get(&file.mountpoint) else {
			return errno::EBADF;
		};
		file.seek(sb, offset)
	}

	/// `mkdir(2)`. Only absolute pathnames are accepted.
	pub fn mkdir(&mut self, pathname: &str, mode: u32) -> i32 {
		let Some((_mountpoint, sb, relative)) = self.superblock_mut(pathname) else {
			return errno::ENODEV;
		};

		let (status, p_inode) = Inode::lookup(&relative, sb);
		match status {
			0 => return errno::EEXIST,
			-2 => return errno::ENOENT,
			-1 => {},
			other if other < -2 => return other,
			_ => {},
		}

		let Some(new_ino) = sb.alloc_inode() else {
			return errno::EDQUOT;
		};
		let p_ino = p_inode.ino;
		sb.with_inode_mut(new_ino, |inode, sb| {
			inode.p_ino = Some(p_ino);
			inode.mkdir(sb, mode)
		});
		let fname = basename(&relative);
		sb.with_inode_mut(p_ino, |parent, sb| parent.add_dir_entry(sb, &fname, new_ino))
	}

	/// Selects the longest mounted prefix of `pathname`, stripping it off
	/// (subdirectory mounts must be considered before the root mount, or
	/// they would never be selected).
	fn resolve(&self, pathname: &str) -> Option<(String, String)> {
		let mut mountpoints: Vec<&String> = self.mounts.keys().collect();
		mountpoints.sort_unstable_by(|a, b| b.cmp(a));

		for mountpoint in mountpoints {
			if let Some(rest) = pathname.strip_prefix(mountpoint.as_str()) {
				let relative = if mountpoint == "/" {
					pathname.to_string()
				} else if rest.is_empty() {
					"/".to_string()
				} else {
					rest.to_string()
				};
				return Some((mountpoint.clone(), relative));
			}
		}
		None
	}

	fn superblock_mut(&mut self, pathname: &str) -> Option<(String, &mut SuperBlock, String)> {
		let (mountpoint, relative) = self.resolve(pathname)?;
		let sb = self.mounts.get_mut(&mountpoint)?;
		Some((mountpoint, sb, relative))
	}
}

impl Default for Vfs {
	fn default() -> Self {
		Self::new()
	}
}

fn valid_slot(proc: &Process, fd: i32) -> Option<()> {
	if fd < 0 {
		return None;
	}
	proc.oft().get(fd as usize)?.as_ref().map(|_| ())
}

fn basename(path: &str) -> String {
	path.rsplit('/').next().unwrap_or(path).to_string()
}

fn is_dir_mode(mode: u32) -> bool {
	mode as libc::mode_t & libc::S_IFMT == libc::S_IFDIR
}

fn is_reg_mode(mode: u32) -> bool {
	mode as libc::mode_t & libc::S_IFMT == libc::S_IFREG
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::block::BLOCK_SIZE;

	fn mounted(tag: &str, num_blocks: u64) -> Vfs {
		let path = std::env::temp_dir().join(format!("slowfs-vfs-test-{tag}-{}", std::process::id()));
		let disk = Disk::create(&path, num_blocks * BLOCK_SIZE as u64).unwrap();
		SuperBlock::format(disk).unwrap().sync_fs();

		let disk = Disk::open(&path, num_blocks * BLOCK_SIZE as u64).unwrap();
		let mut vfs = Vfs::new();
		vfs.mount(disk, "/m");
		vfs
	}

	#[test]
	fn create_write_read_close() {
		let mut vfs = mounted("basic", 20);
		let mut proc = Process::new();

		let fd = vfs.open("/m/file", O_CREAT | O_RDWR, 0o644, &mut proc);
		assert!(fd >= 0);
		assert_eq!(vfs.write(fd, b"Hello world", &mut proc), 11);
		assert_eq!(vfs.seek(fd, 0, &mut proc), 0);
		assert_eq!(vfs.read(fd, 11, &mut proc).unwrap(), b"Hello world");
		assert_eq!(vfs.read(fd, 2, &mut proc).unwrap(), Vec::<u8>::new());
		assert_eq!(vfs.close(fd, &mut proc), 0);
	}

	#[test]
	fn mkdir_then_create_inside() {
		let mut vfs = mounted("mkdir", 20);
		let mut proc = Process::new();

		assert_eq!(vfs.mkdir("/m/sub", 0o755), 0);
		let fd = vfs.open("/m/sub/f", O_CREAT | O_RDWR, 0o644, &mut proc);
		assert!(fd >= 0);
		vfs.write(fd, b"Im in a subdir", &mut proc);
		vfs.seek(fd, 0, &mut proc);
		assert_eq!(vfs.read(fd, 15, &mut proc).unwrap(), b"Im in a subdir");
	}

	#[test]
	fn open_missing_parent_dir_is_enoent() {
		let mut vfs = mounted("missing-parent", 20);
		let mut proc = Process::new();
		let fd = vfs.open("/m/nonexistent/file", O_CREAT | O_RDWR, 0o644, &mut proc);
		assert_eq!(fd, errno::ENOENT);
	}

	#[test]
	fn closed_descriptor_is_reused() {
		let mut vfs = mounted("reuse", 20);
		let mut proc = Process::new();
		let fd = vfs.open("/m/file", O_CREAT | O_RDWR, 0o644, &mut proc);
		vfs.close(fd, &mut proc);
		let fd2 = vfs.open("/m/file", crate::file::O_RDONLY, 0o644, &mut proc);
		assert_eq!(fd, fd2);
	}

	#[test]
	fn open_twice_with_excl_fails() {
		let mut vfs = mounted("excl", 20);
		let mut proc = Process::new();
		vfs.open("/m/file", O_CREAT | O_RDWR, 0o644, &mut proc);
		let fd2 = vfs.open("/m/file", O_CREAT | O_EXCL | O_RDWR, 0o644, &mut proc);
		assert_eq!(fd2, errno::EEXIST);
	}
}
