//! Core library for the labseq sequence engine.
//!
//! This library contains the experiment sequence data model, the executor
//! state machine, and the sequence store for laboratory automation. It is
//! consumed by front-ends (GUI or the bundled CLI) that supply instrument
//! drivers and observe lifecycle events.

pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod instrument;
pub mod scheduler;
pub mod sequence;
pub mod store;
pub mod task;
