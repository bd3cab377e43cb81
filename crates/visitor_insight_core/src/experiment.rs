//! crates/visitor_insight_core/src/experiment.rs
//!
//! Deterministic weighted variant assignment. The same identity always lands in
//! the same variant of an experiment, on any host, without storing the choice.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Picks a variant for `seed` in `experiment`.
///
/// The first eight bytes of `SHA-256("{experiment}:{seed}")` are mapped onto the
/// cumulative weights. Zero-weight variants are never chosen. Returns `None`
/// when there is nothing with positive weight to choose from.
pub fn assign_variant<'a>(seed: Uuid, experiment: &str, variants: &[(&'a str, u32)]) -> Option<&'a str> {
    let total: u64 = variants.iter().map(|(_, weight)| u64::from(*weight)).sum();
    if total == 0 {
        return None;
    }

    let digest = Sha256::digest(format!("{}:{}", experiment, seed).as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let point = u64::from_be_bytes(prefix) % total;

    let mut upper = 0u64;
    for (name, weight) in variants {
        upper += u64::from(*weight);
        if point < upper {
            return Some(*name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_stable_for_a_seed() {
        let seed = Uuid::new_v4();
        let variants = [("control", 50), ("treatment", 50)];
        let first = assign_variant(seed, "cta-copy", &variants);
        for _ in 0..10 {
            assert_eq!(assign_variant(seed, "cta-copy", &variants), first);
        }
    }

    #[test]
    fn weights_shape_the_distribution() {
        let variants = [("a", 90), ("b", 10), ("never", 0)];
        let mut a = 0;
        for _ in 0..2000 {
            match assign_variant(Uuid::new_v4(), "pricing", &variants) {
                Some("a") => a += 1,
                Some("b") => {}
                other => panic!("unexpected variant {:?}", other),
            }
        }
        assert!((1650..=1950).contains(&a), "a = {}", a);
    }

    #[test]
    fn empty_or_zero_weights_assign_nothing() {
        assert_eq!(assign_variant(Uuid::new_v4(), "x", &[]), None);
        assert_eq!(assign_variant(Uuid::new_v4(), "x", &[("a", 0)]), None);
    }
}
