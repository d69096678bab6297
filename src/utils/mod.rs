pub mod disk_space;
pub mod humanize;
pub mod logger;

pub use disk_space::{DiskStats, available_space, disk_stats};
pub use humanize::format_file_size;
pub use logger::{init_logging, init_logging_in};
