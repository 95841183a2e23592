//! Bindings and operator tooling for the Chainlink Automation `KeeperRegistryLogic2_0`
//! contract.
//!
//! [`bindings`] is the generated surface (calls, transactions, events, errors, deploy).
//! The remaining modules build the operator workflow on top of it: a typed [`registry`]
//! client, an event [`scanner`] feeding a persisted upkeep index ([`state`]), and a
//! batch `checkUpkeep` simulator ([`checker`]).

pub mod bindings;
pub mod checker;
pub mod config;
pub mod deployments;
pub mod link;
pub mod registry;
pub mod revert;
pub mod scanner;
pub mod state;
pub mod types;
