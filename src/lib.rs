//! Algoswarm - multi-agent trading-strategy orchestration engine
//!
//! Turns a natural-language strategy request into a validated, versioned
//! strategy artifact:
//! - Planner decomposes the request into a dependency-ordered TodoList
//! - Orchestrator dispatches tasks to role-specialized agents over the bus
//! - LLM router fronts all model calls with multi-key rotation, atomic
//!   RPM/TPM reservation, retry, and safety-block tier escalation
//! - Iterative loop turns failures into debugger-issued fix-tasks
//! - Deterministic backtest engine (SimBroker) executed in a sandbox

pub mod agents;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod sim;
