//! `statx` decoding.

/// `statx` flags (`AT_*`).
pub mod stat_flags {
    pub const EMPTY_PATH: i32 = libc::AT_EMPTY_PATH;
    pub const SYMLINK_NOFOLLOW: i32 = libc::AT_SYMLINK_NOFOLLOW;
    pub const NO_AUTOMOUNT: i32 = libc::AT_NO_AUTOMOUNT;
    pub const STATX_FORCE_SYNC: i32 = libc::AT_STATX_FORCE_SYNC;
    pub const STATX_DONT_SYNC: i32 = libc::AT_STATX_DONT_SYNC;
}

/// `statx` field mask (`STATX_*`).
pub mod stat_mask {
    pub const TYPE: u32 = libc::STATX_TYPE;
    pub const MODE: u32 = libc::STATX_MODE;
    pub const NLINK: u32 = libc::STATX_NLINK;
    pub const UID: u32 = libc::STATX_UID;
    pub const GID: u32 = libc::STATX_GID;
    pub const ATIME: u32 = libc::STATX_ATIME;
    pub const MTIME: u32 = libc::STATX_MTIME;
    pub const CTIME: u32 = libc::STATX_CTIME;
    pub const INO: u32 = libc::STATX_INO;
    pub const SIZE: u32 = libc::STATX_SIZE;
    pub const BLOCKS: u32 = libc::STATX_BLOCKS;
    pub const BASIC_STATS: u32 = libc::STATX_BASIC_STATS;
    pub const BTIME: u32 = libc::STATX_BTIME;
    pub const ALL: u32 = libc::STATX_ALL;
}

/// A `statx` timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl From<libc::statx_timestamp> for StatTimestamp {
    fn from(ts: libc::statx_timestamp) -> Self {
        Self { seconds: ts.tv_sec, nanos: ts.tv_nsec }
    }
}

/// File metadata as returned by `statx`. Fields not requested in the
/// mask (see `mask`) are unspecified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    /// Fields the kernel actually filled (`stat_mask::*`).
    pub mask: u32,
    pub block_size: u32,
    pub attributes: u64,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    /// File type and permission bits.
    pub mode: u16,
    pub inode: u64,
    pub size: u64,
    pub blocks: u64,
    pub accessed: StatTimestamp,
    pub created: StatTimestamp,
    pub changed: StatTimestamp,
    pub modified: StatTimestamp,
    pub rdev: (u32, u32),
    pub dev: (u32, u32),
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        u32::from(self.mode) & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        u32::from(self.mode) & libc::S_IFMT == libc::S_IFDIR
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u16 {
        self.mode & 0o7777
    }
}

impl From<&libc::statx> for FileStat {
    fn from(st: &libc::statx) -> Self {
        Self {
            mask: st.stx_mask,
            block_size: st.stx_blksize,
            attributes: st.stx_attributes,
            links: st.stx_nlink,
            uid: st.stx_uid,
            gid: st.stx_gid,
            mode: st.stx_mode,
            inode: st.stx_ino,
            size: st.stx_size,
            blocks: st.stx_blocks,
            accessed: st.stx_atime.into(),
            created: st.stx_btime.into(),
            changed: st.stx_ctime.into(),
            modified: st.stx_mtime.into(),
            rdev: (st.stx_rdev_major, st.stx_rdev_minor),
            dev: (st.stx_dev_major, st.stx_dev_minor),
        }
    }
}
