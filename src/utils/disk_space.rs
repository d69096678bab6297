use std::io;
use std::path::Path;

/// Snapshot of the filesystem holding a path, taken per call and never cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    /// Blocks available to unprivileged users
    pub available_blocks: u64,
    /// Size of one block in bytes
    pub block_size: u64,
}

impl DiskStats {
    /// Free bytes available to unprivileged users
    pub fn available_bytes(&self) -> u64 {
        self.available_blocks.saturating_mul(self.block_size)
    }
}

/// Read disk statistics for the filesystem containing `path`.
///
/// `f_bavail` is counted in units of `f_frsize`, so that is the block size
/// reported here.
#[cfg(unix)]
pub fn disk_stats(path: &Path) -> io::Result<DiskStats> {
    use nix::sys::statvfs::statvfs;
    let stat = statvfs(path).map_err(io::Error::from)?;
    Ok(DiskStats {
        available_blocks: stat.blocks_available() as u64,
        block_size: stat.fragment_size() as u64,
    })
}

#[cfg(not(unix))]
pub fn disk_stats(path: &Path) -> io::Result<DiskStats> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("disk statistics are not supported for {}", path.display()),
    ))
}

/// Get available disk space in bytes for the given path
pub fn available_space(path: &Path) -> io::Result<u64> {
    disk_stats(path).map(|stats| stats.available_bytes())
}
