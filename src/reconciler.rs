// ⚖️ Subscription Reconciler - Merge ledger truth with billing-provider truth
//
// Answers one question: has this student satisfied payment for a period?
// The local ledger is authoritative for administrator-entered payments; a
// recurring subscription at the external billing provider can also cover the
// current period. The merge is read-only and best-effort: when the provider
// is unreachable the answer narrows to ledger-only truth instead of failing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::db::{self, Payment};
use crate::period::Period;

// ============================================================================
// SUBSCRIPTION SNAPSHOT (external, never persisted)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    Other,
}

impl SubscriptionStatus {
    /// Parse a provider status string; anything unrecognized is `Other`
    pub fn from_provider(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "unpaid" => SubscriptionStatus::Unpaid,
            "incomplete" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Other,
        }
    }

    /// Only active and trialing subscriptions can satisfy a period
    pub fn is_billable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// Point-in-time view of one recurring subscription at the billing provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub student_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount: f64,
    pub cancel_at_period_end: bool,
}

impl SubscriptionSnapshot {
    /// Whether the current billing window covers the given instant
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.current_period_start <= at && at < self.current_period_end
    }
}

// ============================================================================
// SUBSCRIPTION LOOKUP (provider seam)
// ============================================================================

/// Read-only access to the billing provider.
///
/// Implementations own their transport, timeout, and credentials; the
/// reconciler makes exactly one call and treats any `Err` as degradation,
/// never as a reason to fail the status query.
pub trait SubscriptionLookup {
    fn find_for_student(&self, student_id: &str) -> Result<Option<SubscriptionSnapshot>>;
}

/// Lookup for deployments without recurring billing
pub struct NoSubscriptions;

impl SubscriptionLookup for NoSubscriptions {
    fn find_for_student(&self, _student_id: &str) -> Result<Option<SubscriptionSnapshot>> {
        Ok(None)
    }
}

/// Snapshot file maintained by an operator (or an export job): a JSON array
/// of subscription snapshots. Stands in for a live provider client behind
/// the same trait.
pub struct JsonSubscriptionSource {
    subscriptions: Vec<SubscriptionSnapshot>,
}

impl JsonSubscriptionSource {
    pub fn from_snapshots(subscriptions: Vec<SubscriptionSnapshot>) -> Self {
        JsonSubscriptionSource { subscriptions }
    }

    /// Load snapshots from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read subscriptions file: {:?}", path.as_ref()))?;

        let subscriptions: Vec<SubscriptionSnapshot> =
            serde_json::from_str(&content).context("Failed to parse subscriptions JSON")?;

        Ok(JsonSubscriptionSource::from_snapshots(subscriptions))
    }

    pub fn snapshot_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl SubscriptionLookup for JsonSubscriptionSource {
    fn find_for_student(&self, student_id: &str) -> Result<Option<SubscriptionSnapshot>> {
        // Prefer a billable subscription when a student has more than one
        let billable = self
            .subscriptions
            .iter()
            .find(|s| s.student_id == student_id && s.status.is_billable());

        let found = billable.or_else(|| {
            self.subscriptions
                .iter()
                .find(|s| s.student_id == student_id)
        });

        Ok(found.cloned())
    }
}

// ============================================================================
// PERIOD STATUS
// ============================================================================

/// Which source confirmed the payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidSource {
    Ledger,
    Subscription,
    None,
}

/// Subscription details surfaced when the provider covers the period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionCover {
    pub id: String,
    pub status: SubscriptionStatus,
    pub period_end: DateTime<Utc>,
    pub auto_renews: bool,
    pub amount: f64,
}

/// Result of the dual-source merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodStatus {
    pub period: Period,
    pub satisfied: bool,
    pub source: PaidSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionCover>,
    /// True when the provider lookup failed and the answer is ledger-only
    pub degraded: bool,
}

/// Decide whether `period` is satisfied for a student.
///
/// The ledger is consulted first; a recorded payment settles the question.
/// Otherwise the billing provider is asked once - a billable subscription
/// whose current window covers `now` also satisfies the period. A failed
/// lookup degrades to ledger-only truth rather than erroring: provider
/// availability must never block a student from seeing their own status.
pub fn period_status(
    conn: &Connection,
    student_id: &str,
    period: Period,
    now: DateTime<Utc>,
    lookup: &dyn SubscriptionLookup,
) -> Result<PeriodStatus> {
    if let Some(payment) = db::payment_for_period(conn, student_id, period)? {
        return Ok(PeriodStatus {
            period,
            satisfied: true,
            source: PaidSource::Ledger,
            payment: Some(payment),
            subscription: None,
            degraded: false,
        });
    }

    let mut degraded = false;

    match lookup.find_for_student(student_id) {
        Ok(Some(sub)) if sub.status.is_billable() && sub.covers(now) => {
            return Ok(PeriodStatus {
                period,
                satisfied: true,
                source: PaidSource::Subscription,
                payment: None,
                subscription: Some(SubscriptionCover {
                    id: sub.id.clone(),
                    status: sub.status,
                    period_end: sub.current_period_end,
                    auto_renews: !sub.cancel_at_period_end,
                    amount: sub.amount,
                }),
                degraded: false,
            });
        }
        Ok(_) => {}
        Err(e) => {
            // Single attempt, no retry; the caller may poll again
            eprintln!(
                "⚠️  Subscription lookup failed for student {}: {}",
                student_id, e
            );
            degraded = true;
        }
    }

    Ok(PeriodStatus {
        period,
        satisfied: false,
        source: PaidSource::None,
        payment: None,
        subscription: None,
        degraded,
    })
}

// ============================================================================
// TESTS
// ============================================================================
