//! Generated document ids.
//!
//! Ids are random alphanumeric strings. They are unique for practical
//! purposes but carry no ordering: listing a collection returns them in
//! lexical order, which is unrelated to insertion order.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Default length of a generated id (62^20 possible values).
pub const AUTO_ID_LENGTH: usize = 20;

/// Generate a random document id of `len` characters.
pub fn auto_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_auto_id_shape() {
        let id = auto_id(AUTO_ID_LENGTH);
        assert_eq!(id.len(), AUTO_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_auto_ids_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| auto_id(AUTO_ID_LENGTH)).collect();
        assert_eq!(ids.len(), 1000);
    }
}
