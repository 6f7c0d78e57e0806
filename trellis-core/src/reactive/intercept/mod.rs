//! Mutation Interceptors
//!
//! The methods in this module are the only way to change a wrapped value.
//! Every one of them runs the same pipeline:
//!
//! 1. gate: the state is live, broadcasts are not nested past the configured
//!    depth, the raw value is not already being mutated on this thread, the
//!    devtool hook is told, the state is not immutable;
//! 2. compare: writing an equal value is a no-op;
//! 3. validate against the sub-schema of the key;
//! 4. write, with no user code running under the container lock;
//! 5. forget child states that are no longer referenced and relink deep
//!    children;
//! 6. broadcast exactly one event.
//!
//! Object writes surface strict-mode validation failures as errors. Every
//! other failure is logged and the call returns as if nothing happened.

mod array;
mod collection;
mod object;

use std::sync::Arc;

use smallvec::smallvec;
use tracing::{error, warn};

use super::broadcast::broadcast;
use super::devtool;
use super::event::{ChangeEvent, EventKind};
use super::link;
use super::runtime::{BusyGuard, Runtime};
use super::state::StateCore;
use crate::config;
use crate::error::{ReactiveError, Result};
use crate::schema::SchemaError;
use crate::value::{Container, Key, Kind, Value};

/// Run the gate for `method`. `None` means the mutation must not happen;
/// the reason has been logged.
pub(crate) fn enter(core: &Arc<StateCore>, method: &str, args: &[Value]) -> Option<BusyGuard> {
    if core.is_destroyed() {
        warn!(
            state = ?core.id(),
            method,
            error = %ReactiveError::access("state is destroyed"),
            "mutation ignored"
        );
        return None;
    }

    let limit = config::current().max_broadcast_depth;
    if Runtime::broadcast_depth() >= limit {
        warn!(
            state = ?core.id(),
            method,
            limit,
            error = %ReactiveError::violation("mutation nested too deeply inside broadcasts"),
            "mutation refused"
        );
        return None;
    }

    let Some(busy) = BusyGuard::acquire(core.raw().id()) else {
        warn!(
            state = ?core.id(),
            method,
            error = %ReactiveError::violation("state is already being mutated"),
            "reentrant mutation refused"
        );
        return None;
    };

    if let Some(devtool) = &core.options.devtool {
        devtool::notify_call(devtool.as_ref(), &core.info(), method, args);
    }

    if core.options.immutable {
        warn!(
            state = ?core.id(),
            method,
            error = %ReactiveError::violation("state is immutable"),
            "mutation refused"
        );
        return None;
    }

    Some(busy)
}

/// Check `value` against the sub-schema for `key`.
pub(crate) fn validate(core: &StateCore, key: &Key, value: Value) -> std::result::Result<Value, SchemaError> {
    match core.child_schema(key) {
        Some(schema) => schema.safe_parse(&value).map(Value::into_stored),
        None => Ok(value),
    }
}

/// Handle a validation failure: an error under `strict`, a log line
/// otherwise.
pub(crate) fn reject(core: &StateCore, key: &Key, source: SchemaError, strict: bool) -> Result<()> {
    let error = ReactiveError::validation(key, source);
    if strict {
        return Err(error);
    }
    error!(state = ?core.id(), %key, %error, "write rejected");
    Ok(())
}

/// Argument form of a key, for devtool hooks.
pub(crate) fn key_value(key: &Key) -> Value {
    match key {
        Key::Name(name) => Value::String(name.clone()),
        Key::Index(index) => Value::from(*index),
        Key::Entry(value) => value.clone(),
        Key::Structure => Value::Undefined,
    }
}

/// Whether `key` may be written. Array indices at or past the configured
/// length limit are refused with a warning.
pub(crate) fn within_bounds(core: &StateCore, key: &Key) -> bool {
    let Key::Index(index) = key else {
        return true;
    };
    let limit = config::current().max_array_length;
    if *index < limit {
        return true;
    }
    warn!(
        state = ?core.id(),
        %key,
        limit,
        error = %ReactiveError::violation("array index out of range"),
        "write refused"
    );
    false
}

/// Write `value` under an already-normalized key. Returns `true` when the
/// write added a key.
pub(crate) fn write_slot(data: &mut Container, key: &Key, value: Value) -> bool {
    match (data, key) {
        (Container::Object(fields), Key::Name(name)) => fields.insert(name.clone(), value).is_none(),
        (Container::Array(items), Key::Index(index)) => {
            if *index < items.len() {
                items[*index] = value;
                false
            } else {
                items.resize(*index, Value::Undefined);
                items.push(value);
                true
            }
        }
        (Container::Map(entries), Key::Entry(k)) => entries.insert(k.clone(), value).is_none(),
        (Container::Set(members), Key::Entry(m)) => members.insert(m.clone()),
        _ => false,
    }
}

/// Remove whatever is stored under `key`. Array slots become holes.
pub(crate) fn remove_slot(data: &mut Container, key: &Key) -> Option<Value> {
    match (data, key) {
        (Container::Object(fields), Key::Name(name)) => fields.shift_remove(name),
        (Container::Array(items), Key::Index(index)) => items.get_mut(*index).map(std::mem::take),
        (Container::Map(entries), Key::Entry(k)) => entries.shift_remove(k),
        (Container::Set(members), Key::Entry(m)) => members.shift_take(m),
        _ => None,
    }
}

/// Bookkeeping after `prev` under `key` was replaced by `value`.
pub(crate) fn settle(core: &Arc<StateCore>, key: &Key, prev: &Value, value: &Value) {
    if let Value::Raw(raw) = prev {
        core.forget_child(raw);
    }
    if core.options.recursive {
        if let Value::Raw(raw) = value {
            core.child_state(key, raw);
        }
    }
    link::relink_key(core, key);
}

/// Bookkeeping after a mutation that may have moved or removed many
/// children.
pub(crate) fn settle_all(core: &Arc<StateCore>, removed: &[Value]) {
    for value in removed {
        if let Value::Raw(raw) = value {
            core.forget_child(raw);
        }
    }
    if core.options.recursive {
        let children = core.raw().read().children();
        for (key, raw) in children {
            core.child_state(&key, &raw);
        }
    }
    link::relink_all(core);
}

/// Validate and write one entry, then broadcast `kind`. Shared by object
/// fields, array slots, map entries and set members. Returns `true` when
/// something was written.
pub(crate) fn write_entry(
    core: &Arc<StateCore>,
    method: &str,
    kind: EventKind,
    key: Key,
    value: Value,
    strict: bool,
) -> Result<bool> {
    let args = match kind {
        EventKind::SetAdd => vec![value.clone()],
        _ => vec![key_value(&key), value.clone()],
    };
    let Some(busy) = enter(core, method, &args) else {
        return Ok(false);
    };

    let (present, prev) = {
        let data = core.raw().read();
        (data.contains_key(&key), data.get(&key))
    };
    if present && prev == value {
        return Ok(false);
    }

    let value = match validate(core, &key, value) {
        Ok(value) => value,
        Err(source) => return reject(core, &key, source, strict).map(|()| false),
    };

    let structural = write_slot(&mut core.raw().write(), &key, value.clone());
    drop(busy);

    settle(core, &key, &prev, &value);
    broadcast(
        core,
        ChangeEvent::new(kind, smallvec![key], prev, value).structural(structural),
    );
    Ok(true)
}

/// Remove one entry, then broadcast `kind`. Returns `true` when something
/// was removed.
pub(crate) fn remove_entry(core: &Arc<StateCore>, kind: EventKind, key: Key) -> bool {
    let Some(busy) = enter(core, "delete", &[key_value(&key)]) else {
        return false;
    };

    if let (Key::Name(name), Some(schema)) = (&key, &core.options.schema) {
        if schema.is_required(name) {
            warn!(
                state = ?core.id(),
                %key,
                error = %ReactiveError::violation("required field cannot be deleted"),
                "delete refused"
            );
            return false;
        }
    }

    let (prev, structural) = {
        let mut data = core.raw().write();
        let structural = data.kind() != Kind::Array;
        match remove_slot(&mut data, &key) {
            Some(prev) => (prev, structural),
            None => return false,
        }
    };
    drop(busy);

    settle(core, &key, &prev, &Value::Undefined);
    broadcast(
        core,
        ChangeEvent::new(kind, smallvec![key], prev, Value::Undefined).structural(structural),
    );
    true
}

/// Log a method called on the wrong kind of container.
pub(crate) fn unsupported(core: &StateCore, method: &str) {
    warn!(
        state = ?core.id(),
        method,
        error = %ReactiveError::Unsupported { kind: core.raw().kind().as_str() },
        "method not available on this container"
    );
}
