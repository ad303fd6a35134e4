pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod store;
pub mod types;

mod processor;
mod progress;
mod recovery;
mod updates;
