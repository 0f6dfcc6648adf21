//! Conflict reconciliation: field-level merge after a lost write race.
//!
//! When a versioned commit fails because another writer got there first, the
//! store does not fail the operation or overwrite the whole record. It
//! diffs what this operation actually changed (current fields vs the
//! snapshot taken at load time), reloads the concurrent writer's committed
//! state, and reapplies only the changed fields on top of it. Untouched
//! fields keep the concurrent writer's values.
//!
//! Policy: when both writers changed the *same* field, this operation's
//! value wins — the merge reasserts every changed field unconditionally.
//! This assumes competing handlers touch disjoint fields, the normal case
//! for sagas where each message type owns its slice of the state.

use crate::model::FieldMap;

/// The fields this operation intends to change: every (name, current value)
/// pair where the current serialization differs from the as-loaded snapshot.
/// A field present in the snapshot but absent from `current` counts as
/// changed to `null`.
pub fn change_set(original: &FieldMap, current: &FieldMap) -> FieldMap {
    let mut changed = FieldMap::new();
    for (name, value) in current {
        if original.get(name) != Some(value) {
            changed.insert(name.clone(), value.clone());
        }
    }
    for name in original.keys() {
        if !current.contains_key(name) {
            changed.insert(name.clone(), serde_json::Value::Null);
        }
    }
    changed
}

/// Merge a freshly reloaded image with this operation's intended changes.
/// The result is the fresh (concurrent writer's) state with every change-set
/// field overwritten by this operation's value.
pub fn merge(fresh: &FieldMap, changes: &FieldMap) -> FieldMap {
    let mut merged = fresh.clone();
    for (name, value) in changes {
        merged.insert(name.clone(), value.clone());
    }
    merged
}
