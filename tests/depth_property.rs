//! Property test for the virtual-stack depth invariant: over randomly
//! generated well-formed postorder trees, the simulated depth never goes
//! negative and always returns to zero at the root, and catalog coverage is
//! exactly a function of the live counts the tree reaches.

use patchjit::ir::{AstKind, TreeBuilder};
use patchjit::stitcher::required_snippets;
use patchjit::x64::{default_catalog, MAX_LIVE};
use patchjit::{OpKind, SyntaxTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Grow a random expression subtree onto the builder. Leaves reference
/// token 0 (a name) or token 1 (a constant); the depth property does not
/// look at tokens at all.
fn grow(rng: &mut StdRng, b: &mut TreeBuilder, budget: &mut u32) {
    if *budget == 0 || rng.gen_bool(0.3) {
        if rng.gen_bool(0.5) {
            b.name(0).unwrap();
        } else {
            b.constant(1).unwrap();
        }
        return;
    }
    *budget -= 1;
    grow(rng, b, budget);
    grow(rng, b, budget);
    let op = if rng.gen_bool(0.5) {
        AstKind::Add
    } else {
        AstKind::Mul
    };
    b.binary(op).unwrap();
}

/// A random well-formed assignment tree with at most `budget` operators
/// in its right-hand side.
fn random_tree(rng: &mut StdRng, mut budget: u32) -> SyntaxTree {
    let mut b = TreeBuilder::new();
    b.name_lval(0).unwrap();
    grow(rng, &mut b, &mut budget);
    b.binary(AstKind::Assign).unwrap();
    b.finish().unwrap()
}

/// Whether the default catalog is expected to carry a given key.
fn expected_in_catalog(op: OpKind, live: u8) -> bool {
    match op {
        OpKind::LoadAddr | OpKind::LoadValue | OpKind::LoadConst => live < MAX_LIVE,
        OpKind::Add | OpKind::Mul | OpKind::AssignIndirect => (2..=MAX_LIVE).contains(&live),
        OpKind::Return => live == 0,
    }
}

#[test]
fn random_well_formed_trees_keep_the_depth_invariant() {
    let catalog = default_catalog().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..500 {
        let budget = rng.gen_range(0..40);
        let tree = random_tree(&mut rng, budget);

        // Simulation succeeding is exactly the invariant: the depth counter
        // never went negative and ended at zero.
        let keys = required_snippets(&tree).unwrap();

        // The walk starts empty and the return fires on an empty stack.
        assert_eq!(keys.first(), Some(&(OpKind::LoadAddr, 0)));
        assert_eq!(keys.last(), Some(&(OpKind::Return, 0)));

        // Coverage is purely a function of the live count.
        for (op, live) in keys {
            assert_eq!(
                catalog.contains(op, live),
                expected_in_catalog(op, live),
                "({op:?}, {live})"
            );
        }
    }
}

#[test]
fn operator_heavy_sequences_cannot_be_built() {
    // The builder refuses to construct trees that would drive the depth
    // negative, so the stitcher can never see one from this path.
    let mut b = TreeBuilder::new();
    b.name(0).unwrap();
    b.name(0).unwrap();
    b.binary(AstKind::Add).unwrap();
    assert!(b.binary(AstKind::Add).is_err());
}
