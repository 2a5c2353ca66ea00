// Arena: a partitioned distributed job engine for agent evaluation.
//
// The controller materializes a scenario bundle, partitions scenario ×
// provider combinations into work items, dispatches them through the
// queue, and aggregates results. Workers execute items either with an
// in-process engine (direct mode) or by driving a deployed agent over
// WebSocket (fleet mode).

pub mod config;
pub mod controller;
pub mod engine;
pub mod partition;
pub mod providers;
pub mod results;
pub mod schedule;
pub mod source;
pub mod templates;
pub mod worker;

pub use config::{ArenaConfig, ScenarioSpec};
pub use partition::{filter_scenarios, partition, ScenarioFilter};
pub use providers::{resolve_providers, KubeProviderCatalog, ProviderCatalog};
pub use results::{JobResults, OutputBackend};
pub use worker::{run_worker, WorkerOptions, WorkerStats};
