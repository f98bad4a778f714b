//! Write-new-then-rename file replacement.

use std::io::{self, Write};
use std::path::Path;

/// Owner read/write only (token store).
pub const PRIVATE_MODE: u32 = 0o600;

/// World readable (exports).
pub const PUBLIC_MODE: u32 = 0o644;

/// Temporary files carry this suffix; its extension is never an export format.
const PARTIAL_SUFFIX: &str = ".partial";

/// Replace `path` with `bytes` atomically.
///
/// The content goes to a hidden temporary file in the same directory which
/// is then renamed over `path`. Concurrent writers to the same path each
/// rename a complete file; the last rename wins. `mode` is applied on Unix
/// and ignored elsewhere.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".redcapfs-")
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    set_mode(tmp.as_file(), mode)?;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}
