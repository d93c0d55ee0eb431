//! # Helios - Multi-Source Battery Charging Arbiter
//!
//! A Rust implementation of a charging-path arbiter for platforms with
//! several cooperating charge sources, coordinating an ordinary buck
//! charger, a direct-charge divider engine and programmable (PPS) power
//! supplies behind a single charger-shaped facade.
//!
//! ## Features
//!
//! - **Async-first**: every task runs on the Tokio runtime
//! - **Source Registry**: discovery and online/offline bookkeeping for all
//!   configured charge sources
//! - **PPS Negotiation**: staged detection walk for wired and wireless
//!   programmable supplies
//! - **Direct Charge**: divider-engine session control with watchdog
//!   supervision and a safe fallback path
//! - **Selection Policy**: battery-voltage and demand driven source choice
//! - **Event Bridge**: a charger-shaped property surface for downstream
//!   consumers, with change fan-out
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The crate follows a modular architecture with clear separation of
//! concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `source`: Charge-source device traits and property vocabulary
//! - `registry`: Source discovery, slots and the online path
//! - `pps`: Programmable-supply detection state machines
//! - `selection`: Source selection policy
//! - `status`: Published charger-state word
//! - `storage`: Tag-addressed scratch storage
//! - `arbiter`: Task loops, session control and the event bridge
//! - `sim`: Simulated devices for tests and hardware-less bring-up

pub mod arbiter;
pub mod config;
pub mod error;
pub mod logging;
pub mod pps;
pub mod registry;
pub mod selection;
pub mod sim;
pub mod source;
pub mod status;
pub mod storage;

// Re-export commonly used types
pub use arbiter::{ArbiterPhase, ArbiterSnapshot, ChargeArbiter, DcState};
pub use config::Config;
pub use error::{HeliosError, Result};
