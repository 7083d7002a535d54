//! Property tests for change-tree normalization.

use proptest::prelude::*;
use tidemark::{ChangeKind, ChangeNode, ChangeTree};

fn change_kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Unknown),
        Just(ChangeKind::Created),
        Just(ChangeKind::Changed),
        Just(ChangeKind::Deleted),
    ]
}

fn path() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-c]{1,2}", 1..=4)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Check the invariant on every node: an ancestor of a live (created or
/// changed) node must itself be live.
fn check(node: &ChangeNode) -> bool {
    let has_live_descendant = node
        .children
        .values()
        .any(|c| matches!(c.change, ChangeKind::Created | ChangeKind::Changed) || check_live(c));
    if has_live_descendant
        && matches!(node.change, ChangeKind::Deleted | ChangeKind::Unknown)
    {
        return false;
    }
    node.children.values().all(check)
}

fn check_live(node: &ChangeNode) -> bool {
    node.children
        .values()
        .any(|c| matches!(c.change, ChangeKind::Created | ChangeKind::Changed) || check_live(c))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: after normalization, no deleted or unmarked node has a
    /// created/changed descendant.
    #[test]
    fn normalization_invariant_holds(
        changes in proptest::collection::vec((path(), change_kind()), 0..24)
    ) {
        let mut tree = ChangeTree::new();
        for (path, change) in changes {
            tree.node_mut(&path).change = change;
        }

        tree.normalize();

        prop_assert!(check(tree.root()));
    }

    /// PROPERTY: normalization never downgrades a live node.
    #[test]
    fn normalization_keeps_live_changes(
        changes in proptest::collection::vec((path(), change_kind()), 0..24)
    ) {
        // The same path may be assigned several times; the last one wins.
        let mut final_changes = std::collections::BTreeMap::new();
        let mut tree = ChangeTree::new();
        for (path, change) in changes {
            tree.node_mut(&path).change = change;
            final_changes.insert(path, change);
        }

        tree.normalize();

        for (path, change) in final_changes {
            if matches!(change, ChangeKind::Created | ChangeKind::Changed) {
                let node = tree.node(&path).unwrap();
                prop_assert!(matches!(
                    node.change,
                    ChangeKind::Created | ChangeKind::Changed
                ));
            }
        }
    }
}
