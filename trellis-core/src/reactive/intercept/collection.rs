//! Map and set methods.
//!
//! Validation failures here are always logged, never returned: strict mode
//! only changes object writes.

use indexmap::{IndexMap, IndexSet};

use super::{enter, remove_entry, settle_all, unsupported, write_entry};
use crate::error::Result;
use crate::reactive::broadcast::broadcast;
use crate::reactive::event::{ChangeEvent, EventKind, Path};
use crate::reactive::state::State;
use crate::value::{Container, Key, Kind, Raw, Value};

impl State {
    pub(crate) fn map_set(&self, key: Value, value: Value) -> Result<()> {
        let key = Key::entry(key);
        write_entry(self.core(), "set", EventKind::MapSet, key, value.into_stored(), false).map(|_| ())
    }

    pub(crate) fn map_delete(&self, key: Value) -> bool {
        remove_entry(self.core(), EventKind::MapDelete, Key::entry(key))
    }

    pub(crate) fn set_delete(&self, member: Value) -> bool {
        remove_entry(self.core(), EventKind::SetDelete, Key::entry(member))
    }

    /// Add a member to a set. Returns `true` when it was not present.
    pub fn add(&self, member: impl Into<Value>) -> bool {
        if self.kind() != Kind::Set {
            unsupported(self.core(), "add");
            return false;
        }
        let member = member.into().into_stored();
        write_entry(
            self.core(),
            "add",
            EventKind::SetAdd,
            Key::Entry(member.clone()),
            member,
            false,
        )
        .unwrap_or(false)
    }

    /// Whether a set holds `member`, or a map has the key `member`.
    pub fn contains(&self, member: impl Into<Value>) -> bool {
        self.has(Key::entry(member))
    }

    /// Remove every entry of a map or every member of a set, as one event.
    pub fn clear(&self) {
        let core = self.core();
        let kind = match self.kind() {
            Kind::Map => EventKind::MapClear,
            Kind::Set => EventKind::SetClear,
            Kind::Object | Kind::Array => {
                unsupported(core, "clear");
                return;
            }
        };

        let Some(busy) = enter(core, "clear", &[]) else {
            return;
        };

        let old = {
            let mut data = core.raw().write();
            if data.is_empty() {
                return;
            }
            match &mut *data {
                Container::Map(entries) => Container::Map(std::mem::replace(entries, IndexMap::new())),
                Container::Set(members) => Container::Set(std::mem::replace(members, IndexSet::new())),
                _ => return,
            }
        };
        drop(busy);

        settle_all(core, &old.values());
        broadcast(
            core,
            ChangeEvent::new(kind, Path::new(), Value::Raw(Raw::new(old)), Value::Undefined)
                .structural(true),
        );
    }
}
