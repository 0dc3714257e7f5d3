//! Loopback guard.
//!
//! Every envelope carries the origin id of the process that built it. A
//! receiver must drop envelopes carrying its own id before any side effect,
//! otherwise relay mode would feed its own output back into itself.

use crate::protocol::Envelope;

/// True when `env` was sent by the local process.
pub fn is_self(env: &Envelope, local_origin_id: u32) -> bool {
    env.origin_id() == local_origin_id
}

/// Origin id of the current process.
pub fn process_origin_id() -> u32 {
    std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Channel;

    #[test]
    fn same_origin_is_self() {
        let env = Envelope::new(42, Channel::Ls1, 7, &b"Alice"[..], &b"hi"[..]);
        assert!(is_self(&env, 42));
        assert!(!is_self(&env, 99));
    }
}
