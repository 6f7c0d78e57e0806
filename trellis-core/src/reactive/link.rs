//! Recursive links between parent and child states.
//!
//! While a state has recursive subscribers it is "deep": every container it
//! holds is wrapped and linked, so the child's broadcasts continue on the
//! parent with the link key prefixed. Deepness is reference counted: a
//! recursive subscriber retains its state once, and every link retains the
//! child once. Linking is transitive because a retained child links its own
//! children as soon as its count leaves zero.
//!
//! Cycles in the data are linked once per edge and stop there; the cascade
//! in the broadcast visits each state once.

use std::sync::Arc;

use super::state::{State, StateCore};
use crate::value::Key;

/// Count one more reason for `core` to be deep.
pub(crate) fn retain(core: &Arc<StateCore>) {
    let first = {
        let mut meta = core.meta.lock();
        meta.deep += 1;
        meta.deep == 1
    };

    if first && !core.is_destroyed() {
        link_children(core);
    }
}

/// Drop one reason for `core` to be deep; unlinks all children when the
/// last one goes.
pub(crate) fn release(core: &Arc<StateCore>) {
    let links = {
        let mut meta = core.meta.lock();
        if meta.deep == 0 {
            return;
        }
        meta.deep -= 1;
        if meta.deep > 0 {
            return;
        }
        std::mem::take(&mut meta.links)
    };

    for (key, child) in links {
        detach_parent(child.core(), Arc::as_ptr(core), &key);
        release(child.core());
    }
}

/// Relink the child stored under `key` after a write to it.
pub(crate) fn relink_key(core: &Arc<StateCore>, key: &Key) {
    let old: Vec<State> = {
        let mut meta = core.meta.lock();
        if meta.deep == 0 {
            return;
        }
        let (old, kept) = std::mem::take(&mut meta.links)
            .into_iter()
            .partition::<Vec<_>, _>(|(k, _)| k == key);
        meta.links = kept;
        old.into_iter().map(|(_, child)| child).collect()
    };

    let current = core.raw().get(key.clone()).as_raw();
    if let Some(raw) = current {
        link(core, key.clone(), &raw);
    }

    // New links are made before old ones are released so a child that
    // stays in place never drops to zero.
    for child in old {
        detach_parent(child.core(), Arc::as_ptr(core), key);
        release(child.core());
    }
}

/// Relink every child, after a mutation that moved or replaced many of them.
pub(crate) fn relink_all(core: &Arc<StateCore>) {
    let old = {
        let mut meta = core.meta.lock();
        if meta.deep == 0 {
            return;
        }
        std::mem::take(&mut meta.links)
    };

    link_children(core);

    for (key, child) in old {
        detach_parent(child.core(), Arc::as_ptr(core), &key);
        release(child.core());
    }
}

fn link_children(core: &Arc<StateCore>) {
    let children = core.raw().read().children();
    for (key, raw) in children {
        link(core, key, &raw);
    }
}

fn link(parent: &Arc<StateCore>, key: Key, raw: &crate::value::Raw) {
    let child = parent.child_state(&key, raw);

    // A container holding itself needs no link: its own broadcast already
    // reaches its subscribers.
    if Arc::ptr_eq(child.core(), parent) || child.is_destroyed() {
        return;
    }

    child
        .core()
        .meta
        .lock()
        .parents
        .push((Arc::downgrade(parent), key.clone()));
    parent.meta.lock().links.push((key, child.clone()));
    retain(child.core());
}

/// Remove one `(parent, key)` entry from the child's parent list.
pub(crate) fn detach_parent(child: &Arc<StateCore>, parent: *const StateCore, key: &Key) {
    let mut meta = child.meta.lock();
    if let Some(index) = meta
        .parents
        .iter()
        .position(|(p, k)| std::ptr::eq(p.as_ptr(), parent) && k == key)
    {
        meta.parents.remove(index);
    }
}

/// Remove the parent's link to a child that is going away.
pub(crate) fn drop_link(parent: &Arc<StateCore>, child: *const StateCore, key: &Key) {
    let removed: Vec<(Key, State)> = {
        let mut meta = parent.meta.lock();
        let (removed, kept) = std::mem::take(&mut meta.links)
            .into_iter()
            .partition::<Vec<_>, _>(|(k, c)| k == key && std::ptr::eq(Arc::as_ptr(c.core()), child));
        meta.links = kept;
        removed
    };
    drop(removed);
}
