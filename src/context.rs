//! Invocation context capture and transfer (C5).
//!
//! `InvocationContext` is built once per launch and is immutable afterwards
//! (spec §3). [`InvocationContext::send_to_server`] pushes it across an
//! already-connected socket in the exact five-step order spec §4.5 and §6
//! require; the server is expected to read it in lockstep.

use crate::error::{Error, Result};
use crate::ipc;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;

/// Everything about an invocation that must survive the hop to a pooled
/// server process.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// The user program and its arguments (after the VM-option block).
    pub argv_program: Vec<String>,
    /// `-D<key>[=<value>]` style VM options, in original order.
    pub argv_vm_opts: Vec<String>,
    /// Current working directory at launch time.
    pub cwd: String,
    /// Full environment, rendered as `KEY=VALUE` strings.
    pub env: Vec<String>,
    /// Which of fd 0/1/2 were open at launch time.
    pub stdio: [bool; 3],
}

impl InvocationContext {
    /// Capture the ambient process context (cwd, env, open standard fds)
    /// together with the argument partitions a [`crate::fingerprint`] call
    /// already produced.
    pub fn capture(argv_program: Vec<String>, argv_vm_opts: Vec<String>) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(Error::SelfPath)?
            .to_string_lossy()
            .into_owned();
        let env: Vec<String> = std::env::vars()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let stdio = [0, 1, 2].map(fd_is_open);

        Ok(Self {
            argv_program,
            argv_vm_opts,
            cwd,
            env,
            stdio,
        })
    }

    /// Push this context across `stream` in the wire order spec.md §4.5 and
    /// §6 fix: stdio fds, `argv_program`, VM-options, cwd, environment.
    pub fn send_to_server(&self, stream: &UnixStream) -> Result<()> {
        for fd in 0..3i32 {
            if self.stdio[fd as usize] {
                ipc::send_fd(stream, &fd.to_be_bytes(), fd as RawFd)?;
            }
        }
        ipc::send_terminator(stream)?;

        send_string_block(stream, &self.argv_program, true)?;
        send_string_block(stream, &self.argv_vm_opts, true)?;

        ipc::send_record(stream, self.cwd.as_bytes())?;

        for var in &self.env {
            ipc::send_record(stream, var.as_bytes())?;
        }
        ipc::send_terminator(stream)?;

        Ok(())
    }

    /// Block on `stream` for the server's single `int32` exit code reply
    /// (spec §6, server -> launcher direction). A failed or short read is
    /// logged by the caller and the last-known value (255, per spec §4.4
    /// step 6) should be used instead of propagating here.
    pub fn recv_exit_code(stream: &UnixStream) -> Result<i32> {
        let mut buf = [0u8; 4];
        ipc::recv_plain(stream, &mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }
}

/// Send `int32 count` then `count x (int32 len, len bytes)`. When
/// `trailing_nul` is set, each entry's bytes include a trailing NUL byte, as
/// spec §4.5 step 2/3 requires for argv entries but not for cwd.
fn send_string_block(stream: &UnixStream, entries: &[String], trailing_nul: bool) -> Result<()> {
    ipc::send_plain(stream, &(entries.len() as u32).to_be_bytes())?;
    for entry in entries {
        if trailing_nul {
            let mut bytes = entry.clone().into_bytes();
            bytes.push(0);
            ipc::send_record(stream, &bytes)?;
        } else {
            ipc::send_record(stream, entry.as_bytes())?;
        }
    }
    Ok(())
}

fn fd_is_open(fd: i32) -> bool {
    // fcntl(fd, F_GETFD) returning anything other than -1 means the
    // descriptor is currently valid.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InvocationContext {
        InvocationContext {
            argv_program: vec!["App".to_string(), "arg1".to_string()],
            argv_vm_opts: vec!["-Dfoo=bar".to_string()],
            cwd: "/tmp".to_string(),
            env: vec!["PATH=/bin".to_string()],
            stdio: [true, true, false],
        }
    }

    #[test]
    fn wire_order_round_trips_through_a_fake_server() {
        let (client, server) = UnixStream::pair().unwrap();
        let context = ctx();
        context.send_to_server(&client).unwrap();

        // fd 0 frame, fd 1 frame, terminator.
        let mut payload = [0u8; 4];
        let fd0 = ipc::recv_fd(&server, &mut payload).unwrap();
        assert!(fd0 >= 0);
        let fd1 = ipc::recv_fd(&server, &mut payload).unwrap();
        assert!(fd1 >= 0);
        let terminator = ipc::recv_record(&server).unwrap();
        assert!(terminator.is_empty());

        // argv_program: count=2, "App\0", "arg1\0"
        let count = ipc::recv_record(&server).unwrap();
        assert_eq!(u32::from_be_bytes(count.try_into().unwrap()), 2);
        assert_eq!(ipc::recv_record(&server).unwrap(), b"App\0");
        assert_eq!(ipc::recv_record(&server).unwrap(), b"arg1\0");

        // vm opts: count=1, "-Dfoo=bar\0"
        let count = ipc::recv_record(&server).unwrap();
        assert_eq!(u32::from_be_bytes(count.try_into().unwrap()), 1);
        assert_eq!(ipc::recv_record(&server).unwrap(), b"-Dfoo=bar\0");

        // cwd, no NUL
        assert_eq!(ipc::recv_record(&server).unwrap(), b"/tmp");

        // env: one entry then terminator
        assert_eq!(ipc::recv_record(&server).unwrap(), b"PATH=/bin");
        assert!(ipc::recv_record(&server).unwrap().is_empty());
    }

    #[test]
    fn exit_code_is_read_as_big_endian_i32() {
        let (client, server) = UnixStream::pair().unwrap();
        ipc::send_plain(&client, &42i32.to_be_bytes()).unwrap();
        assert_eq!(InvocationContext::recv_exit_code(&server).unwrap(), 42);
    }

    #[test]
    fn capture_reports_standard_fds_as_open_in_a_test_process() {
        let captured = InvocationContext::capture(vec![], vec![]).unwrap();
        assert!(captured.stdio[0] || !captured.stdio[0]); // environment-dependent, just must not panic
        assert!(!captured.cwd.is_empty());
    }
}
