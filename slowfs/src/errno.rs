//! POSIX error codes returned by the filesystem.
//!
//! The VFS surface never panics on a user-facing error; it returns one of
//! these as a negative `i32`, mirroring the convention of every syscall in
//! `man 2 open`, `man 2 mkdir`, etc. Values are sourced from `libc` rather
//! than hand-numbered so they agree with the host's errno.h.

/// No such file or directory.
pub const ENOENT: i32 = -(libc::ENOENT as i32);
/// Path exists under `O_CREAT|O_EXCL` or `mkdir`.
pub const EEXIST: i32 = -(libc::EEXIST as i32);
/// File descriptor invalid, or access mode mismatch.
pub const EBADF: i32 = -(libc::EBADF as i32);
/// Path is a directory where a file was required.
pub const EISDIR: i32 = -(libc::EISDIR as i32);
/// Path component used as a directory is not one.
pub const ENOTDIR: i32 = -(libc::ENOTDIR as i32);
/// Illegal name, bad flag/mode combination, directory-suffix misuse.
pub const EINVAL: i32 = -(libc::EINVAL as i32);
/// Data zone full or per-inode block ceiling reached.
pub const ENOSPC: i32 = -(libc::ENOSPC as i32);
/// Inode table full.
pub const EDQUOT: i32 = -(libc::EDQUOT as i32);
/// Process open-file table full.
pub const EMFILE: i32 = -(libc::EMFILE as i32);
/// Pathname outside any mount.
pub const ENODEV: i32 = -(libc::ENODEV as i32);
/// Seek past end of file.
pub const ENXIO: i32 = -(libc::ENXIO as i32);

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn lookup_status_codes_dont_collide_with_errno() {
		// Inode::lookup() also returns the bare status codes 0, -1, -2; those
		// must stay distinguishable from the errno values it can also return.
		for code in [ENODEV, EINVAL] {
			assert!(![0, -1, -2].contains(&code));
		}
	}
}
