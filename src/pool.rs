//! Pool coordinator (C4): per-pool mutual exclusion via the filesystem and
//! the connect-or-spawn loop over slots `0..N-1`.
//!
//! Grounded on `examples/original_source/hottub/client/java.c::run_hottub`.
//! The filesystem remains the single source of truth for slot ownership
//! (spec §9): `mkdir` decides who spawns a server, exclusive creation of
//! `client.pid` decides who gets to talk to it. Neither decision is ever
//! made twice or cached in memory.

use crate::config::HottubSettings;
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::paths;
use hottub_protocol::PoolId;
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::unistd::ForkResult;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

const SERVER_PID_FILE: &str = "server.pid";
const CLIENT_PID_FILE: &str = "client.pid";
const SLOT_DIR_MODE: u32 = 0o775;

/// Exit code reported when a server handshake completed but the final exit
/// read failed (spec §4.4 step 6: "still propagate the last known value,
/// initially 255").
const UNKNOWN_EXIT_CODE: i32 = 255;

/// Try every slot `0..settings.pool_size`, returning the server's reported
/// exit code on the first successful handshake. `None` means every slot was
/// busy or otherwise unusable and the caller should fall back to a direct
/// exec.
pub fn run(
    fingerprint_id: PoolId,
    context: &InvocationContext,
    settings: &HottubSettings,
) -> Result<Option<i32>> {
    let data_root = paths::data_root()?;
    run_under_root(&data_root, fingerprint_id, context, settings)
}

/// Same as [`run`], but against an explicit `data_root` rather than this
/// executable's install-derived one. Lets tests exercise the full slot walk
/// against a temporary directory.
fn run_under_root(
    data_root: &Path,
    fingerprint_id: PoolId,
    context: &InvocationContext,
    settings: &HottubSettings,
) -> Result<Option<i32>> {
    fs::create_dir_all(data_root).map_err(Error::SlotReserve)?;

    for slot in 0..settings.pool_size {
        let id = fingerprint_id.with_slot(slot);
        match run_in_slot(&data_root, id, context, settings) {
            Ok(code) => return Ok(Some(code)),
            Err(e) if e.is_slot_local() => {
                tracing::debug!(slot, error = %e, "slot unusable, advancing");
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::warn!(pool_size = settings.pool_size, "all pool slots busy");
    Ok(None)
}

fn run_in_slot(
    data_root: &Path,
    id: PoolId,
    context: &InvocationContext,
    settings: &HottubSettings,
) -> Result<i32> {
    let slot_path = data_root.join(id.as_path_str().trim_start_matches('/'));

    match DirBuilder::new().mode(SLOT_DIR_MODE).create(&slot_path) {
        Ok(()) => {
            tracing::debug!(slot = ?slot_path, "reserved slot, spawning server");
            spawn_server(&slot_path, id, settings)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::debug!(slot = ?slot_path, "slot already reserved");
        }
        Err(e) => return Err(Error::SlotReserve(e)),
    }

    claim_client_marker(&slot_path)?;
    let result = connect_and_transfer(id, context, settings);
    // Only unlink client.pid once a full handshake actually completed (spec
    // §4.4 step 7). On any failure the marker is left in place — a stale
    // client.pid simply burns a slot until external cleanup (spec §9).
    if result.is_ok() {
        let _ = fs::remove_file(slot_path.join(CLIENT_PID_FILE));
    }
    result
}

/// Fork a server for this slot. The child detaches into its own session and
/// execs the real VM with the pool-tag option prepended; the parent records
/// the child's pid and returns immediately without waiting for it (spec §5:
/// "the parent does not wait for the forked server").
fn spawn_server(slot_path: &Path, id: PoolId, settings: &HottubSettings) -> Result<()> {
    let stdout_path = slot_path.join("stdout");
    let stderr_path = slot_path.join("stderr");

    // SAFETY: between fork and exec the child only calls async-signal-safe
    // functions (setsid, dup2, open, execv) before replacing itself.
    match unsafe { nix::unistd::fork() }.map_err(|e| Error::SpawnServer(std::io::Error::from(e)))? {
        ForkResult::Parent { child } => {
            let pid_line = format!("{}\n", child.as_raw());
            fs::write(slot_path.join(SERVER_PID_FILE), pid_line).map_err(Error::SpawnServer)?;
            Ok(())
        }
        ForkResult::Child => {
            if let Err(e) = spawn_server_child(&stdout_path, &stderr_path, id, settings) {
                tracing::error!(error = %e, "server child setup failed");
            }
            // If exec ever returns, or setup failed, the child must not run
            // on as a copy of the launcher.
            std::process::exit(127);
        }
    }
}

fn spawn_server_child(
    stdout_path: &Path,
    stderr_path: &Path,
    id: PoolId,
    settings: &HottubSettings,
) -> Result<()> {
    nix::unistd::setsid().map_err(|e| Error::SpawnServer(std::io::Error::from(e)))?;

    redirect_stdio(stdout_path, stderr_path)?;

    let real = paths::exec_real()?;
    let mut argv = vec![real.to_string_lossy().into_owned()];
    // The full 34-byte rendering, slot digit included: the server needs to
    // know which slot it was spawned into, not just the pool's digest.
    argv.push(format!("{}={}", settings.pool_tag_option, id.as_path_str()));
    argv.extend(std::env::args().skip(1));

    crate::fallback::exec_argv(&real, &argv)
}

fn redirect_stdio(stdout_path: &Path, stderr_path: &Path) -> Result<()> {
    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stdout_path)
        .map_err(Error::SpawnServer)?;
    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stderr_path)
        .map_err(Error::SpawnServer)?;
    let devnull = OpenOptions::new()
        .read(true)
        .open("/dev/null")
        .map_err(Error::SpawnServer)?;

    dup2_fd(devnull.as_raw_fd(), 0)?;
    dup2_fd(stdout.as_raw_fd(), 1)?;
    dup2_fd(stderr.as_raw_fd(), 2)?;
    Ok(())
}

fn dup2_fd(src: i32, dst: i32) -> Result<()> {
    nix::unistd::dup2(src, dst)
        .map(|_| ())
        .map_err(|e| Error::SpawnServer(std::io::Error::from(e)))
}

/// Atomically create `client.pid`. Success means this launcher owns the
/// slot for the rest of the invocation; an existing file means the slot is
/// busy (spec §4.4 step 3).
fn claim_client_marker(slot_path: &Path) -> Result<()> {
    let path = slot_path.join(CLIENT_PID_FILE);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(Error::ClientMarker)?;
    writeln!(file, "{}", std::process::id()).map_err(Error::ClientMarker)?;
    Ok(())
}

fn connect_and_transfer(
    id: PoolId,
    context: &InvocationContext,
    settings: &HottubSettings,
) -> Result<i32> {
    let stream = connect_with_retry(id, settings)?;
    context.send_to_server(&stream)?;

    match InvocationContext::recv_exit_code(&stream) {
        Ok(code) => Ok(code),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read exit code, using last known value");
            Ok(UNKNOWN_EXIT_CODE)
        }
    }
}

fn connect_with_retry(id: PoolId, settings: &HottubSettings) -> Result<UnixStream> {
    let addr = UnixAddr::new_abstract(&id.as_socket_bytes()[1..])
        .map_err(|e| Error::Connect(std::io::Error::from(e)))?;
    let retry_config = settings.retry_config();

    hottub_protocol::retry_with_backoff(
        &retry_config,
        |e: &nix::Error| hottub_protocol::is_transient_network_error(*e as i32),
        |attempt| {
            tracing::trace!(attempt, "connect attempt");
            let sock: OwnedFd = socket::socket(
                AddressFamily::Unix,
                SockType::Stream,
                SockFlag::empty(),
                None,
            )?;
            // `sock` owns the fd: a failed `connect` propagates via `?` and
            // drops `sock` on the way out, closing it instead of leaking it
            // across retry attempts.
            socket::connect(&sock, &addr)?;
            Ok(UnixStream::from(sock))
        },
    )
    .map_err(|e| Error::Connect(std::io::Error::from(e)))
}

/// Resolve the on-disk directory that a previously-reserved slot would use,
/// for callers (namely `hottubctl`) that only need to read layout, never
/// create one.
pub fn slot_dir(data_root: &Path, id: PoolId) -> PathBuf {
    data_root.join(id.as_path_str().trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_dir_strips_leading_path_separator() {
        let id = PoolId::from_digest_hex("0123456789abcdef0123456789abcdef")
            .unwrap()
            .with_slot(3);
        let dir = slot_dir(Path::new("/data"), id);
        assert_eq!(dir.parent().unwrap(), Path::new("/data"));
        assert!(!dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with('/'));
    }

    #[test]
    fn second_racer_sees_eexist_and_existing_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let data_root = tmp.path();
        let id = PoolId::from_digest_hex("abcdefabcdefabcdefabcdefabcdefab")
            .unwrap()
            .with_slot(0);
        let slot_path = slot_dir(data_root, id);

        fs::create_dir(&slot_path).unwrap();
        let second_attempt = fs::create_dir(&slot_path);
        assert_eq!(
            second_attempt.unwrap_err().kind(),
            std::io::ErrorKind::AlreadyExists
        );

        claim_client_marker(&slot_path).unwrap();
        let second_claim = claim_client_marker(&slot_path);
        assert!(second_claim.is_err());
    }

    fn fast_settings(pool_size: u8) -> HottubSettings {
        HottubSettings {
            pool_size,
            connect_retries: 2,
            connect_retry_delay_ms: 0,
            ..HottubSettings::default()
        }
    }

    fn fake_context() -> InvocationContext {
        InvocationContext {
            argv_program: vec!["App".to_string()],
            argv_vm_opts: vec![],
            cwd: "/tmp".to_string(),
            env: vec![],
            stdio: [false, false, false],
        }
    }

    #[test]
    fn walks_every_busy_slot_then_reports_none() {
        // Every slot already has a server.pid *and* a client.pid: the
        // coordinator must advance through all of them without ever
        // opening a socket, and report no slot was usable (spec scenario
        // "warm pool, all slots busy").
        let tmp = tempfile::tempdir().unwrap();
        let data_root = tmp.path();
        let settings = fast_settings(3);
        let id = PoolId::from_digest_hex("fedcbafedcbafedcbafedcbafedcbaf").unwrap();

        for slot in 0..settings.pool_size {
            let slot_id = id.with_slot(slot);
            let slot_path = slot_dir(data_root, slot_id);
            fs::create_dir(&slot_path).unwrap();
            fs::write(slot_path.join(SERVER_PID_FILE), "1\n").unwrap();
            fs::write(slot_path.join(CLIENT_PID_FILE), "2\n").unwrap();
        }

        let context = fake_context();
        let result = run_under_root(data_root, id, &context, &settings).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn preexisting_slot_with_no_live_server_advances_without_forking() {
        // Slot 0's directory already exists (as if a previous launcher had
        // reserved it), so this launcher takes the EEXIST branch and skips
        // straight to the connect phase instead of forking a new server.
        // With no real server listening, the connect retries are exhausted
        // and the coordinator must advance to slot 1 rather than panic or
        // hang.
        let tmp = tempfile::tempdir().unwrap();
        let data_root = tmp.path();
        let settings = fast_settings(2);
        let id = PoolId::from_digest_hex("1111111111111111111111111111111").unwrap();

        let slot0 = slot_dir(data_root, id.with_slot(0));
        let slot1 = slot_dir(data_root, id.with_slot(1));
        fs::create_dir(&slot0).unwrap();
        fs::create_dir(&slot1).unwrap();

        let context = fake_context();
        let result = run_under_root(data_root, id, &context, &settings).unwrap();

        assert_eq!(result, None);
        assert!(slot0.exists());
        // A failed connect leaves client.pid in place (spec §9: "a stale
        // client.pid simply burns a slot until cleanup") rather than
        // unlinking it, which would wrongly let another launcher believe
        // the slot just freed up.
        assert!(
            slot0.join(CLIENT_PID_FILE).exists(),
            "client.pid must survive a failed connect, not be cleaned up"
        );
        assert!(slot1.join(CLIENT_PID_FILE).exists());
    }
}
