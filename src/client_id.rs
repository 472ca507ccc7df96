//! Provisional identifiers for transaction candidates.
//!
//! A provisional ID is unique within a session with overwhelming probability,
//! not globally unique. The server only ever treats it as a dedupe key for
//! retried confirmations; record identity is always the server-assigned row ID.

use rand::Rng;
use time::OffsetDateTime;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_SUFFIX_LENGTH: usize = 8;

/// Generate a provisional ID: the current unix milliseconds in base 36
/// followed by a random base-36 suffix.
pub fn generate() -> String {
    let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;

    let mut id = to_base36(millis);
    let mut rng = rand::thread_rng();

    for _ in 0..RANDOM_SUFFIX_LENGTH {
        id.push(BASE36_DIGITS[rng.gen_range(0..BASE36_DIGITS.len())] as char);
    }

    id
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }

    let mut digits = Vec::new();

    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize] as char);
        value /= 36;
    }

    digits.into_iter().rev().collect()
}

#[cfg(test)]
mod client_id_tests {
    use std::collections::HashSet;

    use crate::client_id::{generate, to_base36};

    #[test]
    fn encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_000_000), "lfls");
    }

    #[test]
    fn generated_ids_use_base36_characters_only() {
        let id = generate();

        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn generated_ids_do_not_collide_within_a_session() {
        let ids: HashSet<String> = (0..1000).map(|_| generate()).collect();

        assert_eq!(ids.len(), 1000);
    }
}
