//! Keyed writes: `set`, `delete`, `assign`.
//!
//! Objects and arrays share these. On arrays the keys are indices, a write
//! past the end pads with holes and a delete leaves a hole. `set` and
//! `delete` on maps and sets forward to the collection methods.

use smallvec::SmallVec;
use tracing::{error, warn};

use super::{enter, key_value, settle, unsupported, validate, within_bounds, write_entry, write_slot};
use crate::error::{ReactiveError, Result};
use crate::reactive::broadcast::broadcast;
use crate::reactive::event::{ChangeEvent, EventKind};
use crate::reactive::state::State;
use crate::value::{Key, Kind, Raw, Value};

impl State {
    /// Write `value` under `key`.
    ///
    /// Fails only for a strict state whose schema rejects the value; the
    /// previous value is kept. A non-strict state logs the rejection and
    /// returns `Ok`. Writing an equal value does nothing.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let core = self.core();
        let key = key.into();
        let value = value.into().into_stored();

        match self.kind() {
            Kind::Map => return self.map_set(key_value(&key), value),
            Kind::Set => {
                unsupported(core, "set");
                return Ok(());
            }
            Kind::Object | Kind::Array => {}
        }

        let Some(key) = core.normalize_key(key).filter(|k| *k != Key::Structure) else {
            warn!(state = ?core.id(), kind = self.kind().as_str(), "set with a key this container cannot hold");
            return Ok(());
        };
        if !within_bounds(core, &key) {
            return Ok(());
        }

        write_entry(core, "set", EventKind::Set, key, value, core.options.strict).map(|_| ())
    }

    /// Remove `key`. Returns `true` when something was removed.
    ///
    /// Fields the schema marks as required cannot be deleted. On arrays the
    /// slot becomes a hole and the length is unchanged.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let core = self.core();
        let key = key.into();

        match self.kind() {
            Kind::Map => return self.map_delete(key_value(&key)),
            Kind::Set => return self.set_delete(key_value(&key)),
            Kind::Object | Kind::Array => {}
        }

        match core.normalize_key(key).filter(|k| *k != Key::Structure) {
            Some(key) => super::remove_entry(core, EventKind::Delete, key),
            None => false,
        }
    }

    /// Shallow-merge `entries` as a single mutation with a single `assign`
    /// event.
    ///
    /// Every entry is validated before anything is written. A strict state
    /// fails on the first invalid entry and writes nothing; any other state
    /// drops the invalid entries with a log line and writes the rest.
    pub fn assign<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        let core = self.core();
        if !matches!(self.kind(), Kind::Object | Kind::Array) {
            unsupported(core, "assign");
            return Ok(());
        }

        let entries: Vec<(Key, Value)> = entries
            .into_iter()
            .filter_map(|(key, value)| {
                let key = core.normalize_key(key.into()).filter(|k| *k != Key::Structure);
                if key.is_none() {
                    warn!(state = ?core.id(), "assign skipped a key this container cannot hold");
                }
                key.filter(|key| within_bounds(core, key))
                    .map(|key| (key, value.into().into_stored()))
            })
            .collect();

        let args = Raw::object_from(entries.iter().map(|(k, v)| (k.to_string(), v.clone())));
        let Some(busy) = enter(core, "assign", &[Value::Raw(args)]) else {
            return Ok(());
        };

        let changed: Vec<(Key, Value, Value)> = {
            let data = core.raw().read();
            entries
                .into_iter()
                .filter_map(|(key, value)| {
                    let prev = data.get(&key);
                    let unchanged = data.contains_key(&key) && prev == value;
                    (!unchanged).then_some((key, value, prev))
                })
                .collect()
        };

        let mut accepted = Vec::with_capacity(changed.len());
        for (key, value, prev) in changed {
            match validate(core, &key, value) {
                Ok(value) => accepted.push((key, value, prev)),
                Err(source) => {
                    let error = ReactiveError::validation(&key, source);
                    if core.options.strict {
                        return Err(error);
                    }
                    error!(state = ?core.id(), %key, %error, "assign entry rejected");
                }
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }

        let mut structural = false;
        {
            let mut data = core.raw().write();
            for (key, value, _) in &accepted {
                structural |= write_slot(&mut data, key, value.clone());
            }
        }
        drop(busy);

        for (key, value, prev) in &accepted {
            settle(core, key, prev, value);
        }

        let keys: SmallVec<[Key; 4]> = accepted.iter().map(|(key, _, _)| key.clone()).collect();
        let prev = Raw::object_from(accepted.iter().map(|(k, _, p)| (k.to_string(), p.clone())));
        let value = Raw::object_from(accepted.iter().map(|(k, v, _)| (k.to_string(), v.clone())));
        broadcast(
            core,
            ChangeEvent::new(EventKind::Assign, keys, Value::Raw(prev), Value::Raw(value))
                .structural(structural),
        );
        Ok(())
    }
}
