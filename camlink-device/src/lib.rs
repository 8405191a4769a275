//! # camlink-device — camera uplink agent
//!
//! Device-side process that loads the persisted configuration, builds the
//! streaming pipeline from `camlink-core` and runs it under a supervisor.
//!
//! ## Exit status
//!
//! - **0**: stopped on request (Ctrl-C).
//! - **3**: repeated connect failures; the supervisor should restart us.
//! - **4**: the force recovery flag is set; the recovery workflow takes over.

pub mod config;
pub mod service;
