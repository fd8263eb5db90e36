//! # machguard-core
//!
//! Mach-O integrity and runtime environment verification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Signature    │  │  Platform    │  │  Integrity   │      │
//! │  │ database     │  │ (native/sim) │  │  Verifier    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              Probe catalog (33 checks)            │      │
//! │  │   jailbreak, debugger, sandbox, network, ...      │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              SecurityReport                       │      │
//! │  │    (ordered entries, summary, plist export)       │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   BinaryCursor → MachONavigator → code signature → entitlements
//! ```
//!
//! ## Properties
//!
//! - **Fail-closed**: unreadable or malformed input never reads as secure
//! - **Isolated probes**: one probe's failure or panic never stops a scan
//! - **Atomic reports**: readers see the previous report or the new one

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bundle;
pub mod config;
pub mod engine;
pub mod entitlements;
pub mod error;
pub mod export;
pub mod macho;
pub mod platform;
pub mod probes;
pub mod reader;
pub mod report;
pub mod security;
pub mod signatures;

pub use bundle::AppBundle;
pub use config::EngineConfig;
pub use engine::Engine;
pub use entitlements::Entitlements;
pub use error::{ParseError, SignatureSetError};
pub use macho::MachONavigator;
pub use platform::{NativePlatform, Platform, SimulatedPlatform};
pub use probes::{Category, CheckKind, Evidence, SecurityCheck, Status};
pub use reader::BinaryCursor;
pub use report::{ReportEntry, SecurityReport, Severity};
pub use security::{FileIntegrityCheck, IntegrityReport, IntegrityTarget, IntegrityVerifier};
pub use signatures::DetectionSignatureSet;

/// Target triple this crate was compiled for.
pub const TARGET: &str = env!("TARGET");
