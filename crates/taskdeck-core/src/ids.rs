//! Store-side identifiers: a short prefix plus random base-36 characters.

use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix on generated ids.
pub const SUFFIX_LEN: usize = 10;

/// Generate an id like `td-4k2m9x0qzp`.
#[must_use]
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    format!("{prefix}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_prefix_and_fixed_suffix() {
        let id = generate("td");
        assert!(id.starts_with("td-"));
        assert_eq!(id.len(), 3 + SUFFIX_LEN);
        assert!(id[3..].bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn ids_do_not_collide_in_small_batches() {
        let ids: HashSet<String> = (0..500).map(|_| generate("pm")).collect();
        assert_eq!(ids.len(), 500);
    }
}
