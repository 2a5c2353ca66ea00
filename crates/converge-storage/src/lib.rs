// Tiered session storage.
//
// Three optional tiers with distinct semantics: a warm relational store
// (the durable source of truth and linearization point), a hot cache for
// active sessions, and a cold object archive for aged data. The registry
// composes whichever tiers are configured; privacy decorators wrap the
// write and read paths; the retention sweeper tiers data down over time.

pub mod cold;
pub mod config;
pub mod events;
pub mod hot;
pub mod privacy;
pub mod registry;
pub mod retention;
pub mod warm;

pub use config::{build_registry, ColdConfig, HotConfig, StorageConfig, WarmConfig};
pub use events::{BroadcastEventSink, EventSink, RedisEventSink};
pub use registry::StorageRegistry;
pub use retention::{PolicyStore, RetentionSweeper, SweepReport};
