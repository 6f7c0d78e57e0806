//! Trellis Core
//!
//! This crate provides the reactive state engine of the Trellis framework.
//! It implements:
//!
//! - Reactive containers (objects, arrays, maps, sets) with validated,
//!   intercepted mutation
//! - Fine-grained dependency tracking through observers
//! - A synchronous change broadcast with recursive propagation to parents
//! - Debounced scheduling primitives for coalescing bursts of changes
//! - Derivation helpers: pipes, two-way bindings, derived views
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: plain data (`Value`, `Key`, `Raw` containers)
//! - `schema`: the validation hook states call into
//! - `reactive`: states, interceptors, observers and the broadcast pipeline
//! - `schedule`: `microbatch` and `microtask`
//! - `derive`: `pipe`, `bind`, `derive`, `log`
//! - `config`: process-wide engine settings
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{wrap, Observer};
//! use serde_json::json;
//!
//! // Wrap plain data
//! let todo = wrap(json!({"title": "write docs", "done": false}))?;
//!
//! // Track what a render reads
//! let render = Observer::new(|event| println!("changed: {}", event.path_string()));
//! render.run(|| todo.get("done"));
//!
//! // Only changes to `done` fire the observer
//! todo.set("title", "write more docs")?;
//! todo.set("done", true)?;
//! // prints: "changed: done"
//! ```

pub mod config;
pub mod derive;
pub mod error;
pub mod reactive;
pub mod schedule;
pub mod schema;
pub mod value;

pub use config::EngineConfig;
pub use derive::{bind, bind_with, derive, log, pipe, Binding, Transform};
pub use error::{ReactiveError, Result};
pub use reactive::{
    create_observer, destroy, set_observer, subscribe, untracked, unwrap, wrap, wrap_with, ChangeEvent,
    EventKind, Observer, State, StateOptions, Subscription,
};
pub use schedule::{microbatch, microtask, MicroBatch, MicroTask, Task};
pub use schema::{Schema, SchemaError};
pub use value::{Container, Key, Kind, Raw, RawId, Value};
