// Tuition Ledger - Web Server
// JSON API over the payment ledger, roster, and reconciler

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tuition_ledger::{
    business_metrics, collection_status, delete_payment, enroll_student, get_student,
    list_payments, list_students, period_status, record_payment, set_student_active,
    JsonSubscriptionSource, LedgerError, NewPayment, NewStudent, NoSubscriptions, PaymentFilter,
    PaymentMethod, Period, RuleViolation, SubscriptionLookup,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    subscriptions: Arc<dyn SubscriptionLookup + Send + Sync>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

/// Error body: the message plus the offending period where one exists, so
/// clients can point the user at the exact month to fix
#[derive(Serialize)]
struct ApiError {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_period: Option<Period>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_period: Option<Period>,
}

impl ApiError {
    fn message(error: String) -> Self {
        Self {
            success: false,
            error,
            missing_period: None,
            next_period: None,
        }
    }
}

fn ledger_error_response(e: &LedgerError) -> (StatusCode, Json<ApiError>) {
    let mut body = ApiError::message(e.to_string());

    let status = match e {
        LedgerError::Rule(violation) => {
            match violation {
                RuleViolation::GapInSequence { missing, .. } => {
                    body.missing_period = Some(*missing);
                }
                RuleViolation::HasLaterPayments { next, .. } => {
                    body.next_period = Some(*next);
                }
                _ => {}
            }
            StatusCode::BAD_REQUEST
        }
        LedgerError::Forbidden => StatusCode::FORBIDDEN,
        LedgerError::StudentNotFound(_) | LedgerError::PaymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(body))
}

fn internal_error(e: &anyhow::Error) -> (StatusCode, Json<ApiError>) {
    eprintln!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::message("internal error".to_string())),
    )
}

fn unauthorized() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::message("not authorized".to_string())),
    )
}

/// The identity provider in front of this API resolves the session to a
/// stable teacher id; it arrives here as an opaque bearer token
fn bearer_teacher(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

#[derive(Deserialize)]
struct RecordPaymentRequest {
    student_id: String,
    period_month: u32,
    period_year: i32,
    paid_on: NaiveDate,
    amount: f64,
    method: PaymentMethod,
    note: Option<String>,
}

/// POST /api/payments - Record a tuition payment
async fn record_payment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RecordPaymentRequest>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let period = match Period::new(req.period_year, req.period_month) {
        Ok(period) => period,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError::message(e.to_string())),
            )
                .into_response();
        }
    };

    let conn = state.db.lock().unwrap();

    let new_payment = NewPayment {
        student_id: req.student_id,
        period,
        paid_on: req.paid_on,
        amount: req.amount,
        method: req.method,
        note: req.note,
    };

    match record_payment(&conn, &teacher_id, new_payment) {
        Ok(payment) => (StatusCode::OK, Json(ApiResponse::ok(payment))).into_response(),
        Err(e) => ledger_error_response(&e).into_response(),
    }
}

/// DELETE /api/payments/:id - Delete a payment (latest period only)
async fn delete_payment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    match delete_payment(&conn, &teacher_id, &payment_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::ok("payment deleted")),
        )
            .into_response(),
        Err(e) => ledger_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
struct ListPaymentsParams {
    student_id: Option<String>,
    month: Option<u32>,
    year: Option<i32>,
}

/// GET /api/payments - List the teacher's payments with optional filters
async fn list_payments_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListPaymentsParams>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    let filter = PaymentFilter {
        student_id: params.student_id,
        month: params.month,
        year: params.year,
    };

    match list_payments(&conn, &teacher_id, &filter) {
        Ok(payments) => (StatusCode::OK, Json(ApiResponse::ok(payments))).into_response(),
        Err(e) => ledger_error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
struct PaymentStatusParams {
    student_id: String,
}

/// GET /api/payments/status - Is the current period satisfied for a student?
/// Merges the ledger with the billing provider; provider failures degrade to
/// ledger-only truth instead of erroring.
async fn payment_status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PaymentStatusParams>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    let student = match get_student(&conn, &params.student_id) {
        Ok(Some(student)) => student,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiError::message(format!(
                    "student not found: {}",
                    params.student_id
                ))),
            )
                .into_response();
        }
        Err(e) => return internal_error(&e).into_response(),
    };

    if student.teacher_id != teacher_id {
        return ledger_error_response(&LedgerError::Forbidden).into_response();
    }

    let now = Utc::now();
    let period = Period::from_datetime(now);

    match period_status(&conn, &student.id, period, now, state.subscriptions.as_ref()) {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::ok(status))).into_response(),
        Err(e) => internal_error(&e).into_response(),
    }
}

#[derive(Deserialize)]
struct ListStudentsParams {
    #[serde(default)]
    active_only: bool,
}

/// GET /api/students - List the teacher's roster
async fn list_students_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListStudentsParams>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    match list_students(&conn, &teacher_id, params.active_only) {
        Ok(students) => (StatusCode::OK, Json(ApiResponse::ok(students))).into_response(),
        Err(e) => internal_error(&e).into_response(),
    }
}

#[derive(Deserialize)]
struct EnrollRequest {
    full_name: String,
    guardian_name: String,
    guardian_phone: String,
    monthly_fee: f64,
    enrolled_on: NaiveDate,
    billing_day: u32,
}

/// POST /api/students - Enroll a new student
async fn enroll_student_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EnrollRequest>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    let new_student = NewStudent {
        teacher_id,
        full_name: req.full_name,
        guardian_name: req.guardian_name,
        guardian_phone: req.guardian_phone,
        monthly_fee: req.monthly_fee,
        enrolled_on: req.enrolled_on,
        billing_day: req.billing_day,
    };

    match enroll_student(&conn, new_student) {
        Ok(student) => (StatusCode::OK, Json(ApiResponse::ok(student))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::message(e.to_string())),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct SetActiveRequest {
    active: bool,
}

/// POST /api/students/:id/active - Activate or deactivate a student
async fn set_student_active_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Json(req): Json<SetActiveRequest>,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();

    match set_student_active(&conn, &teacher_id, &student_id, req.active) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok("updated"))).into_response(),
        Err(e) => ledger_error_response(&e).into_response(),
    }
}

/// GET /api/collection - Paid/pending split for the current period
async fn collection_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(teacher_id) = bearer_teacher(&headers) else {
        return unauthorized().into_response();
    };

    let conn = state.db.lock().unwrap();
    let period = Period::from_datetime(Utc::now());

    match collection_status(&conn, &teacher_id, period) {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::ok(status))).into_response(),
        Err(e) => internal_error(&e).into_response(),
    }
}

/// GET /api/metrics - Business-wide collection metrics
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if bearer_teacher(&headers).is_none() {
        return unauthorized().into_response();
    }

    let conn = state.db.lock().unwrap();
    let period = Period::from_datetime(Utc::now());

    match business_metrics(&conn, period) {
        Ok(metrics) => (StatusCode::OK, Json(ApiResponse::ok(metrics))).into_response(),
        Err(e) => internal_error(&e).into_response(),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🌐 Tuition Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Open database
    let db_path = std::env::var("TUITION_DB").unwrap_or_else(|_| "tuition.db".to_string());
    let db_path = std::path::Path::new(&db_path);

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: tuition-ledger init");
        eprintln!("   to create it first.");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path).expect("Failed to open database");
    println!("✓ Database opened: {:?}", db_path);

    // Subscription snapshots: optional JSON file, otherwise no recurring
    // billing is consulted
    let subscriptions: Arc<dyn SubscriptionLookup + Send + Sync> =
        match std::env::var("TUITION_SUBSCRIPTIONS") {
            Ok(path) => {
                let source = JsonSubscriptionSource::from_file(&path)
                    .expect("Failed to load subscriptions file");
                println!(
                    "✓ Subscription snapshots loaded: {} ({})",
                    source.snapshot_count(),
                    path
                );
                Arc::new(source)
            }
            Err(_) => {
                println!("✓ No subscriptions file configured (ledger-only mode)");
                Arc::new(NoSubscriptions)
            }
        };

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        subscriptions,
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route(
            "/payments",
            get(list_payments_handler).post(record_payment_handler),
        )
        .route("/payments/status", get(payment_status_handler))
        .route("/payments/:id", delete(delete_payment_handler))
        .route(
            "/students",
            get(list_students_handler).post(enroll_student_handler),
        )
        .route("/students/:id/active", post(set_student_active_handler))
        .route("/collection", get(collection_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/payments");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
