//! Pool identity layout.
//!
//! A pool identity is a fixed 34-byte printable token: one leading byte used
//! for addressing mode (`/` when used as a path component, NUL when used as
//! an abstract-namespace socket address), 32 hex bytes of a 128-bit digest,
//! and one trailing byte that encodes the slot index within the pool. The
//! slot byte is mutated in place as the pool coordinator walks slots
//! `0..N-1`; it starts out as the placeholder `_` before any slot has been
//! chosen.

/// Total byte width of a pool identity (1 + 32 + 1).
pub const ID_LEN: usize = 34;

/// Placeholder slot byte before a slot has been selected.
pub const SLOT_PLACEHOLDER: u8 = b'_';

/// Index of the leading addressing byte.
const LEAD: usize = 0;

/// Index of the trailing slot byte.
const SLOT: usize = ID_LEN - 1;

/// A 34-byte pool identity token.
///
/// `PoolId` does not itself know whether it is currently meant to be used as
/// a path component or a socket address — callers pick the rendering with
/// [`PoolId::as_path_str`] / [`PoolId::as_socket_bytes`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId([u8; ID_LEN]);

impl PoolId {
    /// Build an id from a 32-character lowercase hex digest.
    ///
    /// The leading byte is initialized to `/` (path mode) and the slot byte
    /// to the placeholder; call [`PoolId::with_slot`] to pick a slot.
    pub fn from_digest_hex(hex_digest: &str) -> Option<Self> {
        if hex_digest.len() != ID_LEN - 2 || !hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut buf = [0u8; ID_LEN];
        buf[LEAD] = b'/';
        buf[1..ID_LEN - 1].copy_from_slice(hex_digest.as_bytes());
        buf[SLOT] = SLOT_PLACEHOLDER;
        Some(Self(buf))
    }

    /// Parse a previously-rendered path-mode id string (as found in a slot
    /// directory name under `data_root`), e.g. `/deadbeef...000...5`.
    pub fn from_path_str(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != ID_LEN {
            return None;
        }
        let mut buf = [0u8; ID_LEN];
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    /// Return a copy of this id with the slot byte set to `slot`.
    ///
    /// `slot` must be a single decimal digit (`0..=9`); the pool is never
    /// sized beyond 10 slots in practice (spec default is 4).
    pub fn with_slot(mut self, slot: u8) -> Self {
        debug_assert!(slot <= 9, "slot index must fit in one decimal digit");
        self.0[SLOT] = b'0' + slot;
        self
    }

    /// The slot index this id currently carries, if it has been set.
    pub fn slot(&self) -> Option<u8> {
        let b = self.0[SLOT];
        if b == SLOT_PLACEHOLDER {
            None
        } else {
            Some(b - b'0')
        }
    }

    /// The 32-character hex digest portion, independent of addressing mode
    /// or slot.
    pub fn digest_hex(&self) -> &str {
        std::str::from_utf8(&self.0[1..ID_LEN - 1]).expect("digest bytes are always ascii hex")
    }

    /// Render as a path component: leading byte is `/`.
    pub fn as_path_str(&self) -> String {
        let mut buf = self.0;
        buf[LEAD] = b'/';
        // Safety/clarity: all bytes are ascii by construction.
        String::from_utf8(buf.to_vec()).expect("id bytes are always ascii")
    }

    /// Render as an abstract-namespace socket address body: leading byte is
    /// NUL. Returns the full `ID_LEN`-byte buffer; callers copy it into a
    /// `sockaddr_un` and rely on the leading NUL to select the abstract
    /// namespace.
    pub fn as_socket_bytes(&self) -> [u8; ID_LEN] {
        let mut buf = self.0;
        buf[LEAD] = 0;
        buf
    }
}

impl std::fmt::Debug for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PoolId({}, slot={:?})",
            self.digest_hex(),
            self.slot()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn round_trips_path_and_socket_rendering() {
        let id = PoolId::from_digest_hex(DIGEST).unwrap().with_slot(2);
        assert_eq!(id.as_path_str().len(), ID_LEN);
        assert_eq!(id.as_path_str().as_bytes()[0], b'/');
        assert_eq!(id.as_socket_bytes()[0], 0);
        assert_eq!(id.slot(), Some(2));
    }

    #[test]
    fn width_is_always_34_regardless_of_slot() {
        for slot in 0..=9u8 {
            let id = PoolId::from_digest_hex(DIGEST).unwrap().with_slot(slot);
            assert_eq!(id.as_path_str().len(), ID_LEN);
            assert_eq!(id.as_socket_bytes().len(), ID_LEN);
        }
    }

    #[test]
    fn placeholder_slot_before_selection() {
        let id = PoolId::from_digest_hex(DIGEST).unwrap();
        assert_eq!(id.slot(), None);
    }

    #[test]
    fn rejects_wrong_length_digest() {
        assert!(PoolId::from_digest_hex("deadbeef").is_none());
    }
}
