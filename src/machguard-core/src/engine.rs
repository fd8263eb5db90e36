//! Check orchestrator.
//!
//! The [`Engine`] owns the signature database, the platform primitives and
//! the integrity verifier, and runs the probe catalog on request.
//!
//! ## Scan lifecycle
//!
//! `idle → running → idle`, guarded by a single in-flight flag. A scan
//! requested while another is running is dropped, neither queued nor
//! reported as an error. Every probe runs in catalog order; a new
//! [`SecurityReport`] is built from scratch and published with one swap,
//! so readers observe either the previous report or the new one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::bundle::AppBundle;
use crate::config::EngineConfig;
use crate::platform::{NativePlatform, Platform};
use crate::probes::{self, CheckKind, ProbeContext};
use crate::report::SecurityReport;
use crate::security::IntegrityVerifier;
use crate::signatures::DetectionSignatureSet;

/// Clears the in-flight flag when the scan ends, including by unwinding.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The security verification engine.
pub struct Engine {
    signatures: DetectionSignatureSet,
    platform: Arc<dyn Platform>,
    verifier: IntegrityVerifier,
    scanning: AtomicBool,
    report: RwLock<Arc<SecurityReport>>,
}

impl Engine {
    /// Create an engine over the host OS.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_platform(config, Arc::new(NativePlatform::new()))
    }

    /// Create an engine over the given platform primitives.
    pub fn with_platform(config: &EngineConfig, platform: Arc<dyn Platform>) -> Self {
        let bundle = AppBundle::locate(config);
        let signatures =
            DetectionSignatureSet::load_for_bundle(config.signatures_path.as_deref(), &bundle);
        Self::with_parts(signatures, bundle, platform)
    }

    /// Create an engine from already resolved parts.
    pub fn with_parts(
        signatures: DetectionSignatureSet,
        bundle: AppBundle,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let (populated, total) = signatures.coverage();
        info!(
            platform = platform.name(),
            bundle = %bundle.root.display(),
            "Engine: ready, {} of {} signature categories populated",
            populated,
            total
        );
        let verifier = IntegrityVerifier::new(bundle, Arc::clone(&platform));
        Self {
            signatures,
            platform,
            verifier,
            scanning: AtomicBool::new(false),
            report: RwLock::new(Arc::new(SecurityReport::pending())),
        }
    }

    /// The signature database in use.
    pub fn signatures(&self) -> &DetectionSignatureSet {
        &self.signatures
    }

    /// The application bundle under inspection.
    pub fn bundle(&self) -> &AppBundle {
        self.verifier.bundle()
    }

    /// The platform primitives in use.
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Run every probe and publish a new report.
    ///
    /// Returns `false` without doing anything if a scan is already running.
    #[instrument(skip(self))]
    pub fn run_all(&self) -> bool {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Engine: scan already in flight, request dropped");
            return false;
        }
        let _in_flight = InFlight(&self.scanning);

        let ctx = ProbeContext {
            signatures: &self.signatures,
            platform: self.platform.as_ref(),
            verifier: &self.verifier,
        };
        let checks: Vec<_> = CheckKind::ALL
            .iter()
            .map(|&kind| probes::run(kind, &ctx))
            .collect();

        let report = SecurityReport::build(checks, self.signatures.coverage(), Some(Utc::now()));
        if report.is_compromised() {
            warn!(
                failed = report.summary.failed,
                total = report.summary.total,
                "Engine: scan complete, environment compromised"
            );
        } else {
            info!(
                passed = report.summary.passed,
                total = report.summary.total,
                "Engine: scan complete, no finding"
            );
        }
        self.publish(report);
        true
    }

    /// Run a scan on the blocking thread pool.
    ///
    /// Resolves to the result of [`Engine::run_all`].
    pub fn scan_in_background(self: &Arc<Self>) -> tokio::task::JoinHandle<bool> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.run_all())
    }

    fn publish(&self, report: SecurityReport) {
        let report = Arc::new(report);
        match self.report.write() {
            Ok(mut slot) => *slot = report,
            Err(poisoned) => *poisoned.into_inner() = report,
        }
    }

    /// The most recently published report.
    pub fn current_report(&self) -> Arc<SecurityReport> {
        match self.report.read() {
            Ok(slot) => Arc::clone(&slot),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Whether a scan is in flight.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Whether the most recent report has a failed probe.
    pub fn is_compromised(&self) -> bool {
        self.current_report().is_compromised()
    }
}
