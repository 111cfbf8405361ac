//! Property-based tests for hashing and voting-power arithmetic.

use proptest::prelude::*;

use crate::merkle::{proofs_from_byte_slices, root_from_byte_slices};
use crate::validators::TrustThreshold;

proptest! {
    #[test]
    fn merkle_proofs_always_verify(items in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..64), 1..32)) {
        let (root, proofs) = proofs_from_byte_slices(&items);
        prop_assert_eq!(root, root_from_byte_slices(&items));
        for (i, proof) in proofs.iter().enumerate() {
            prop_assert!(proof.verify(&root, &items[i]).is_ok());
        }
    }

    #[test]
    fn merkle_root_changes_with_any_leaf(
        items in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..32), 2..16),
        idx in any::<prop::sample::Index>(),
    ) {
        let i = idx.index(items.len());
        let mut mutated = items.clone();
        mutated[i].push(0xff);
        prop_assert_ne!(root_from_byte_slices(&items), root_from_byte_slices(&mutated));
    }

    #[test]
    fn trust_threshold_bounds(num in 1u64..100, den in 1u64..100) {
        let ok = TrustThreshold::new(num, den).is_ok();
        prop_assert_eq!(ok, num * 3 >= den && num <= den);
    }
}
