//! # zvm-driver
//!
//! Hypervisor driver core for z/VM.
//!
//! The driver keeps an in-memory registry of domains, translates domain
//! descriptions into z/VM user directory entries, and drives the hypervisor
//! through the SMAPI command-line client (`smcli`).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     ZvmStateDriver  (init / cleanup)    │
//! │        open() ──► ZvmConnection         │
//! │            (HypervisorDriver)           │
//! └─────────────────────┬───────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────┐
//! │               ZvmDriver                 │
//! │  capabilities · version · registry      │
//! └──────┬───────────────┬──────────────────┘
//!        │               │
//!        ▼               ▼
//! ┌─────────────┐ ┌─────────────────────────┐
//! │ translate   │ │ Smcli ─► CommandRunner  │
//! │ (directory  │ │ (SystemCommandRunner or │
//! │  entries)   │ │  MockSmcli)             │
//! └─────────────┘ └─────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zvm_driver::{AllowAll, ClientIdentity, DomainDescription, DriverConfig,
//!                  HypervisorDriver, MockSmcli, OpenOutcome, ZvmStateDriver};
//! use zvm_telemetry::FixedHostProbe;
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = ZvmStateDriver::new(Arc::new(AllowAll));
//!     state.initialize(true, DriverConfig::default(),
//!                      Arc::new(FixedHostProbe::s390x()),
//!                      Arc::new(MockSmcli::new())).unwrap();
//!
//!     let OpenOutcome::Opened(conn) = state.open(None, &ClientIdentity::new("root")).unwrap() else {
//!         return;
//!     };
//!     let vm = conn.domain_create(DomainDescription::new("linux01").with_memory(2048)).await.unwrap();
//!     println!("started {} with id {}", vm.name, vm.id);
//! }
//! ```

pub mod acl;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod connection;
pub mod domain;
pub mod driver;
pub mod error;
pub mod mock;
pub mod registry;
pub mod smcli;
pub mod traits;
pub mod translate;
pub mod types;
pub mod version;

pub use acl::{AccessCheck, AllowAll, ClientIdentity, Permission, ReadOnlyPolicy};
pub use capabilities::CapabilityModel;
pub use command::{CapturedOutput, CommandRunner, SystemCommandRunner};
pub use config::DriverConfig;
pub use connection::{OpenOutcome, ZvmConnection, ZvmStateDriver, DEFAULT_URI};
pub use driver::{ZvmDriver, DRIVER_TYPE};
pub use error::{DriverError, Result};
pub use mock::{MockReply, MockSmcli};
pub use traits::HypervisorDriver;
pub use types::*;
pub use version::HypervisorVersion;
