// Converge operator: reconcilers for the six declared platform kinds.

pub mod conditions;
pub mod controller;
pub mod metrics;
pub mod phase;
pub mod reconcilers;
pub mod resolver;
pub mod resources;
