//! Structured reporting of broken invariants and recovered failures.
//!
//! Instead of only logging with `tracing::warn!`, violations are structured records
//! that can be:
//!
//! - logged via tracing (the default, see [`TracingObserver`]),
//! - collected for assertions in tests ([`CollectingObserver`]),
//! - forwarded to an application-specific [`ViolationObserver`].
//!
//! A session reports every rollback it performs as a `Warning` of kind
//! [`ViolationKind::RemoteSync`], so an observer sees the failure even when the caller
//! drops the returned error. A decided game the store would not complete is an `Error` of
//! kind [`ViolationKind::WinCondition`], and a rejected configuration an `Error` of kind
//! [`ViolationKind::Configuration`].
//!
//! # Example
//!
//! ```
//! use schwimmen_tracker::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // ... hand the observer to GameBuilder::with_violation_observer ...
//! assert!(!observer.has_violation(ViolationKind::Invariant));
//! ```

use crate::RoundNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of a violation, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Unexpected but recovered: the operation was rolled back or skipped.
    Warning,
    /// The operation failed in a way the caller has to handle.
    Error,
    /// An invariant is broken; local state may no longer be trustworthy.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subsystem a violation came from.
///
/// # Forward Compatibility
///
/// This enum is `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Calls to the remote round store, including rollbacks after failures.
    RemoteSync,
    /// A decided game whose completion the store did not accept.
    WinCondition,
    /// A session was built with a configuration that failed validation.
    Configuration,
    /// A type's runtime invariant check failed.
    Invariant,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteSync => "remote_sync",
            Self::WinCondition => "win_condition",
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded violation.
///
/// # Example
///
/// ```
/// use schwimmen_tracker::telemetry::{Violation, ViolationKind, ViolationSeverity};
/// use schwimmen_tracker::RoundNumber;
///
/// let violation = Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::RemoteSync,
///     "create_round failed, rolled back",
///     "sync_controller.rs:42",
/// )
/// .with_round(RoundNumber::new(4))
/// .with_context("game", "g-1");
///
/// assert_eq!(violation.round, Some(RoundNumber::new(4)));
/// assert!(violation.to_string().contains("remote_sync"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The subsystem where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The round the violation concerns, if any.
    pub round: Option<RoundNumber>,
    /// Additional key-value context such as the game id or the failed call.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            round: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the round this violation concerns.
    #[must_use]
    pub fn with_round(mut self, round: RoundNumber) -> Self {
        self.round = Some(round);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(round) = self.round {
            write!(f, ", round={round}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Receives violations as they are reported.
///
/// Implementations must be cheap: they run inline with session operations.
pub trait ViolationObserver: Send + Sync {
    /// Called once per reported violation.
    fn on_violation(&self, violation: &Violation);
}

/// Default observer: logs violations through `tracing`.
///
/// `Warning` maps to `tracing::warn!`, `Error` and `Critical` to `tracing::error!`.
/// The severity, kind, location, round and context are emitted as structured fields.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let round = violation
            .round
            .map_or_else(|| "null".to_owned(), |r| r.to_string());
        let context = violation
            .context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(
                    severity,
                    kind,
                    location,
                    round = %round,
                    context = %context,
                    "{}",
                    violation.message
                );
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(
                    severity,
                    kind,
                    location,
                    round = %round,
                    context = %context,
                    "{}",
                    violation.message
                );
            },
        }
    }
}

/// Observer that stores violations so tests can assert on them.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of the specified kind has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Returns all violations at or above the specified severity.
    #[must_use]
    pub fn violations_at_severity(&self, min_severity: ViolationSeverity) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.severity >= min_severity)
            .cloned()
            .collect()
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports a violation to an optional observer, falling back to [`TracingObserver`].
pub fn report_to_observer(observer: Option<&Arc<dyn ViolationObserver>>, violation: &Violation) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation through [`TracingObserver`], tagging it with the call site.
///
/// ```
/// use schwimmen_tracker::{report_violation, telemetry::{ViolationKind, ViolationSeverity}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::RemoteSync,
///     "create_round for round {} timed out after {}ms", 4, 250);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Like [`report_violation!`], but sends the violation to an
/// `Option<Arc<dyn ViolationObserver>>` (tracing when `None`).
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $violation:expr) => {{
        $crate::telemetry::report_to_observer($observer.as_ref(), &$violation);
    }};
}

/// Asserts that an observer collected a violation of the given kind.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "Expected violation of kind {:?}, but found: {:#?}",
            $kind,
            $observer.violations()
        );
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// Description of a broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant was violated.
    pub type_name: &'static str,
    /// Description of the violated invariant.
    pub invariant: String,
    /// Additional diagnostic context.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Adds additional details to the violation.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Types that can check their own invariants at runtime.
pub trait InvariantChecker {
    /// Returns the first broken invariant, if any.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks invariants in debug builds (or with the `paranoid` feature) and reports
/// failures as `Critical` violations. Compiles to nothing otherwise.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [context: {}]",
                violation,
                $context
            );
        }
    }};
}

/// No-op version for release builds without `paranoid` feature.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr, $context:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn sample(severity: ViolationSeverity, kind: ViolationKind) -> Violation {
        Violation::new(severity, kind, "sample", "telemetry.rs:1")
    }

    #[test]
    fn severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_includes_round_and_context() {
        let text = sample(ViolationSeverity::Error, ViolationKind::RemoteSync)
            .with_round(RoundNumber::new(3))
            .with_context("operation", "create_round")
            .to_string();
        assert!(text.contains("[error/remote_sync]"));
        assert!(text.contains("round=3"));
        assert!(text.contains("create_round"));
    }

    #[test]
    fn assert_violation_finds_kind() {
        let observer = CollectingObserver::new();
        observer.on_violation(&sample(ViolationSeverity::Error, ViolationKind::Configuration));
        crate::assert_violation!(observer, ViolationKind::Configuration);
    }

    #[test]
    fn collecting_observer_filters() {
        let observer = CollectingObserver::new();
        observer.on_violation(&sample(ViolationSeverity::Warning, ViolationKind::RemoteSync));
        observer.on_violation(&sample(ViolationSeverity::Critical, ViolationKind::Invariant));

        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::Invariant));
        assert!(!observer.has_violation(ViolationKind::WinCondition));
        assert_eq!(
            observer
                .violations_at_severity(ViolationSeverity::Error)
                .len(),
            1
        );
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn report_to_observer_prefers_given_observer() {
        let collecting = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collecting.clone());
        report_to_observer(
            observer.as_ref(),
            &sample(ViolationSeverity::Warning, ViolationKind::Configuration),
        );
        assert_eq!(collecting.len(), 1);

        report_to_observer(
            None,
            &sample(ViolationSeverity::Warning, ViolationKind::Configuration),
        );
        assert_eq!(collecting.len(), 1);
    }

    #[test]
    fn violation_serializes_kind_snake_case() {
        let json = serde_json::to_string(&sample(
            ViolationSeverity::Warning,
            ViolationKind::WinCondition,
        ))
        .unwrap();
        assert!(json.contains(r#""kind":"win_condition""#));
        assert!(json.contains(r#""round":null"#));
    }

    #[test]
    fn invariant_violation_display() {
        let v = InvariantViolation::new("RoundHistory", "gap in rounds").with_details("at 3");
        assert_eq!(v.to_string(), "RoundHistory: gap in rounds (at 3)");
    }
}
