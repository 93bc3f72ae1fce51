//! # MORPHVAULT API
//!
//! The external surface of the system: change events, the readiness state
//! machine, the anti-recursion event dispatcher, and the versioned plugin
//! interface.
//!
//! ## Design Principles
//!
//! 1. **Synchronous fan-out**: listeners run on the caller's thread, in
//!    registration order; there is no queue to fall behind
//! 2. **No notification storms**: a change caused by handling a change to
//!    the same entity is suppressed at the source, per entity
//! 3. **Versioned grants**: plugins negotiate an interface version once;
//!    unknown versions are declined, never guessed at
//!
//! ## Thread Safety
//!
//! Everything here is `Send + Sync` and safe to call from any thread. The
//! one contract listeners must hold: never (de)register listeners from
//! within a listener callback.

pub mod dispatcher;
pub mod events;
pub mod interface;

pub use dispatcher::EventDispatcher;
pub use events::{
    ActorChangeListener, ChangeChannel, ChangeEvent, ChangeFlags, LifecycleSignal, Readiness,
    ReadinessListener,
};
pub use interface::{
    ApiError, ApiVersion, AssignOptions, BodyApplier, InterfaceRequest, PluginHost,
    PluginInterface,
};
