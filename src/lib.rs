// Tuition Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod db;
pub mod ledger;
pub mod metrics;
pub mod period;
pub mod reconciler;
pub mod roster;
pub mod validator;

// Re-export commonly used types
pub use db::{
    all_active_students, get_events_for_entity, get_payment, get_student, list_students,
    paid_periods, payments_for_student, setup_database, Event, Payment, PaymentMethod, Student,
};
pub use ledger::{
    delete_payment, list_payments, record_payment, validate_payment_deletion, LedgerError,
    NewPayment, PaymentFilter,
};
pub use metrics::{
    business_metrics, collection_status, BusinessMetrics, CollectionStatus, StudentSummary,
};
pub use period::Period;
pub use reconciler::{
    period_status, JsonSubscriptionSource, NoSubscriptions, PaidSource, PeriodStatus,
    SubscriptionCover, SubscriptionLookup, SubscriptionSnapshot, SubscriptionStatus,
};
pub use roster::{enroll_student, import_roster, load_roster_csv, set_student_active, NewStudent};
pub use validator::{validate_deletion, validate_insertion, RuleViolation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
