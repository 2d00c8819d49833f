//! Opaque id generation.
//!
//! Ids are hex-encoded random bytes: collision-resistant tokens, never
//! counters, so records can live forever without compaction.

use rand::RngCore;

/// Generate a lowercase hex token of `n_bytes` random bytes.
pub fn opaque(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    let mut out = String::with_capacity(n_bytes * 2);
    for b in buf {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_hex_and_sized() {
        let id = opaque(8);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = opaque(8);
        let b = opaque(8);
        assert_ne!(a, b);
    }
}
