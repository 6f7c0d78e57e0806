//! Reactive State
//!
//! This module turns plain containers into observable state. A [`State`] is
//! a handle to a shared [`Raw`](crate::value::Raw) container; reads go
//! through it so they can be tracked, and writes go through its mutation
//! methods so they can be validated and announced.
//!
//! # Concepts
//!
//! ## States
//!
//! [`wrap`] returns the one state registered for a container, creating it on
//! first use. Nested containers are wrapped lazily when read and cached by
//! their parent, so the same nested value always comes back as the same
//! state.
//!
//! ## Subscribers
//!
//! A subscriber is a callback attached to one state. It receives every
//! [`ChangeEvent`] produced by that state and, when subscribed recursively,
//! every event produced anywhere below it, with the path to the change.
//!
//! ## Observers
//!
//! An [`Observer`] records which keys are read while it runs and fires only
//! when one of those keys changes. This is the fine-grained counterpart of a
//! subscriber.
//!
//! # Implementation Notes
//!
//! Read tracking uses a thread-local observer stack, the same automatic
//! dependency tracking used by SolidJS, Vue 3 and Leptos. Broadcasts run
//! synchronously inside the mutating call. No lock is held while user code
//! runs.

mod broadcast;
mod context;
mod devtool;
mod event;
mod intercept;
mod link;
mod observer;
mod options;
mod runtime;
mod state;
mod subscriber;

pub use context::{is_tracking, set_observer, untracked, ObserverScope};
pub use devtool::{DevTool, StateInfo};
pub use event::{ArrayOp, ChangeEvent, EventKind, Path};
pub use observer::{create_observer, Observer, ObserverId, OnChange};
pub use options::{Comparator, StateOptions};
pub use runtime::Runtime;
pub use state::{destroy, subscribe, unwrap, wrap, wrap_with, State, StateId};
pub use subscriber::{Handler, SubscriberId, Subscription};

pub(crate) use devtool::panic_message;
pub(crate) use state::live_state;
