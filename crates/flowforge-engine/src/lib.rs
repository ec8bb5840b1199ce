//! Workflow engine: dependency resolution, node executors, and the
//! orchestration loop shared by one-shot runs and deployed endpoints.
//!
//! A run resolves a [`DependencyMap`] from the graph, walks it through a
//! [`ReadySet`] (Kahn's algorithm with lexicographic tie-break), feeds each
//! node the output of its predecessors, and keeps going when a node fails.

pub mod executors;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod service;

pub use orchestrator::{present_output, select_final_output, RunOutcome, WorkflowRunner};
pub use registry::{ExecutorRegistry, ExecutorServices};
pub use resolver::{DependencyMap, ReadySet};
pub use service::{ValidationReport, WorkflowExecutionService};
