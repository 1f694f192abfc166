//! Framed IPC (C3): length-prefixed messages and fd passing over a local
//! stream socket.
//!
//! Two framing modes, grounded on
//! `examples/original_source/hottub/client/java.c::write_fd`/`write_sock`/
//! `read_sock`: a plain frame (just bytes) and a frame-with-fd (the same
//! bytes plus one `SCM_RIGHTS` ancillary-data file descriptor). The
//! standard library has no stable API for ancillary data, so this uses
//! `nix::sys::socket` directly against the stream's raw fd.

use crate::error::{Error, Result};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

fn io_err(context: &str, source: nix::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, source))
}

/// Send `buf` as a plain frame, retrying on short writes until the whole
/// buffer has gone out or a hard error occurs.
pub fn send_plain(stream: &UnixStream, buf: &[u8]) -> Result<()> {
    let fd = stream.as_raw_fd();
    let mut sent = 0;
    while sent < buf.len() {
        let iov = [IoSlice::new(&buf[sent..])];
        let n = sendmsg::<()>(fd, &iov, &[], MsgFlags::empty(), None)
            .map_err(|e| Error::Transfer(io_err("sendmsg", e)))?;
        if n == 0 {
            return Err(Error::Transfer(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "sendmsg wrote zero bytes",
            )));
        }
        sent += n;
    }
    Ok(())
}

/// Receive exactly `buf.len()` bytes as a plain frame.
pub fn recv_plain(stream: &UnixStream, buf: &mut [u8]) -> Result<()> {
    let fd = stream.as_raw_fd();
    let mut received = 0;
    while received < buf.len() {
        let mut iov = [IoSliceMut::new(&mut buf[received..])];
        let msg = recvmsg::<()>(fd, &mut iov, None, MsgFlags::empty())
            .map_err(|e| Error::Transfer(io_err("recvmsg", e)))?;
        if msg.bytes == 0 {
            return Err(Error::Transfer(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed before sending the full frame",
            )));
        }
        received += msg.bytes;
    }
    Ok(())
}

/// Send a small frame carrying one file descriptor's right, via
/// `SCM_RIGHTS` ancillary data. `payload` is typically just the fd number
/// itself (as the original does), used by the receiver only to log which
/// slot (stdin/stdout/stderr) this frame is for.
pub fn send_fd(stream: &UnixStream, payload: &[u8], fd_to_send: RawFd) -> Result<()> {
    let fd = stream.as_raw_fd();
    let iov = [IoSlice::new(payload)];
    let cmsg = [ControlMessage::ScmRights(std::slice::from_ref(&fd_to_send))];
    let n = sendmsg::<()>(fd, &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| Error::Transfer(io_err("sendmsg(SCM_RIGHTS)", e)))?;
    if n != payload.len() {
        return Err(Error::Transfer(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "short write sending fd frame",
        )));
    }
    Ok(())
}

/// Receive a frame that is expected to carry exactly one `SCM_RIGHTS` fd.
/// Returns the duplicated descriptor the kernel handed us. A frame with no
/// ancillary data is a protocol error (spec §4.3).
pub fn recv_fd(stream: &UnixStream, payload: &mut [u8]) -> Result<RawFd> {
    let fd = stream.as_raw_fd();
    let mut iov = [IoSliceMut::new(payload)];
    let mut cmsg_buf = nix::cmsg_space!(RawFd);
    let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(|e| Error::Transfer(io_err("recvmsg(SCM_RIGHTS)", e)))?;

    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(received_fd) = fds.first() {
                return Ok(*received_fd);
            }
        }
    }

    Err(Error::Transfer(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "expected an SCM_RIGHTS frame but received no ancillary data",
    )))
}

/// Send a `(len, bytes)` record: a 4-byte big-endian length prefix followed
/// by the bytes.
pub fn send_record(stream: &UnixStream, bytes: &[u8]) -> Result<()> {
    send_plain(stream, &(bytes.len() as u32).to_be_bytes())?;
    if !bytes.is_empty() {
        send_plain(stream, bytes)?;
    }
    Ok(())
}

/// Send a zero-length record, used as a terminator (e.g. end-of-environment
/// marker).
pub fn send_terminator(stream: &UnixStream) -> Result<()> {
    send_plain(stream, &0u32.to_be_bytes())
}

/// Read a `(len, bytes)` record previously written with [`send_record`].
pub fn recv_record(stream: &UnixStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    recv_plain(stream, &mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    if len > 0 {
        recv_plain(stream, &mut buf)?;
    }
    Ok(buf)
}
