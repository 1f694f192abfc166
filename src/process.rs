//! Process liveness check.
//!
//! `hottub` itself never signals or reaps a server process — a live server
//! just sits in its slot until a client connects (spec §9). The only thing
//! anything in this tree needs to know about another process is whether
//! it's still there, which `hottubctl ls`/`gc`/`status` use to tell a slot
//! with a dead server from one still in use.

/// Check if a process is alive.
///
/// Returns true if the process exists and is running.
pub fn is_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
