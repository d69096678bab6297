use humansize::{BINARY, format_size};

/// Format a byte count for error messages and logs
pub fn format_file_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}
