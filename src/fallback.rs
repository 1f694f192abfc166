//! Fallback exec (C6): replace this process with the real VM binary.
//!
//! Grounded on `examples/original_source/hottub/client/java.c::exec_jvm`.
//! Used both when the opt-in token is absent (straight pass-through) and
//! whenever pooling fails unrecoverably (spec §7). `execv` never returns on
//! success, so any return from [`exec_direct`]/[`exec_argv`] is itself the
//! error case.

use crate::error::{Error, Result};
use crate::paths;
use std::ffi::CString;
use std::path::Path;

/// Re-exec the real VM with the original, unmodified argv (spec §4.4: "fall
/// back to a direct VM exec with the unmodified argv").
pub fn exec_direct(argv_all: &[String]) -> Result<()> {
    let real = paths::exec_real()?;
    let mut argv = vec![real.to_string_lossy().into_owned()];
    argv.extend(argv_all.iter().skip(1).cloned());
    tracing::warn!(real = %real.display(), "falling back to direct exec");
    exec_argv(&real, &argv)
}

/// Replace this process image with `binary`, passing `argv` (including
/// `argv[0]`) and the current environment unchanged.
pub fn exec_argv(binary: &Path, argv: &[String]) -> Result<()> {
    let binary_c = CString::new(binary.as_os_str().to_string_lossy().into_owned())
        .map_err(|e| Error::ExecFailed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    let argv_c: Vec<CString> = argv
        .iter()
        .map(|a| {
            CString::new(a.as_str())
                .map_err(|e| Error::ExecFailed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))
        })
        .collect::<Result<_>>()?;

    let err = nix::unistd::execv(&binary_c, &argv_c).expect_err("execv only returns on failure");
    Err(Error::ExecFailed(std::io::Error::from(err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_argv_on_a_nonexistent_binary_returns_exec_failed() {
        let result = exec_argv(Path::new("/nonexistent/binary/for-test"), &["x".to_string()]);
        assert!(matches!(result, Err(Error::ExecFailed(_))));
    }
}
