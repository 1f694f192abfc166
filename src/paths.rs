//! Self-location: finding the real VM binary and the pool data directory.
//!
//! Both operations are derived from the launcher's own executable path, the
//! Rust analogue of the original source's `readlink("/proc/self/exe")`
//! (`create_execpath`/`create_datapath` in
//! `examples/original_source/hottub/client/java.c`). Both fail closed: if we
//! can't find ourselves, falling back to a direct exec is impossible, so the
//! caller must report the error and exit non-zero rather than silently
//! doing nothing.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Name of the directory (relative to the launcher's installation root)
/// where pool slot directories live.
const DATA_DIR_NAME: &str = "hottub/data";

/// Path of the real, un-intercepted VM binary: this launcher's own
/// executable path with `_real` appended.
pub fn exec_real() -> Result<PathBuf> {
    let mut path = std::env::current_exe().map_err(Error::SelfPath)?;
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("_real");
    path.set_file_name(name);
    Ok(path)
}

/// Root directory under which all pool slot directories live.
///
/// The original strips the trailing `bin/java` (two path segments) from its
/// own path and appends the project's data directory name. We do the same:
/// walk up two components from the executable (its containing `bin/`
/// directory and that directory's parent) and join `hottub/data`.
pub fn data_root() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(Error::SelfPath)?;
    let install_root = exe
        .parent() // strip the binary name
        .and_then(|p| p.parent()) // strip the containing `bin` directory
        .ok_or_else(|| {
            Error::SelfPath(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "executable path too shallow to derive an install root",
            ))
        })?;
    Ok(install_root.join(DATA_DIR_NAME))
}
