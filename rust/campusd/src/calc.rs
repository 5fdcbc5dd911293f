use crate::policy::Policy;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// attended / total × 100, or 0 when no classes have been held.
pub fn attendance_percentage(attended: i64, total_classes: i64) -> f64 {
    if total_classes > 0 {
        (attended as f64 / total_classes as f64) * 100.0
    } else {
        0.0
    }
}

pub fn is_low_attendance(policy: &Policy, total_classes: i64, percentage: f64) -> bool {
    total_classes >= policy.attendance_min_classes && percentage < policy.attendance_floor_percent
}

pub fn marks_percent(marks_obtained: Option<f64>, max_marks: f64) -> Option<f64> {
    let m = marks_obtained?;
    if max_marks > 0.0 {
        Some((m / max_marks) * 100.0)
    } else {
        None
    }
}

/// Letter grade from the policy's bands. Boundaries belong to the higher
/// band. A missing mark is the absent grade.
pub fn grade_for(policy: &Policy, marks_obtained: Option<f64>, max_marks: f64) -> String {
    let Some(pct) = marks_percent(marks_obtained, max_marks) else {
        if marks_obtained.is_none() {
            return policy.absent_grade.clone();
        }
        return policy.failing_grade.clone();
    };
    policy
        .grade_bands
        .iter()
        .find(|b| pct >= b.min_percent)
        .map(|b| b.grade.clone())
        .unwrap_or_else(|| policy.failing_grade.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
        }
    }
}

pub fn payment_status(amount_due: f64, amount_paid: f64) -> PaymentStatus {
    if amount_paid >= amount_due {
        PaymentStatus::Paid
    } else if amount_paid > 0.0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Pending
    }
}

/// Not clamped: an overpayment shows up as a negative balance.
pub fn fee_balance(amount_due: f64, amount_paid: f64) -> f64 {
    amount_due - amount_paid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Issued,
    Overdue,
    Returned,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Overdue => "overdue",
            Self::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(Self::Issued),
            "overdue" => Some(Self::Overdue),
            "returned" => Some(Self::Returned),
            _ => None,
        }
    }
}

pub fn loan_due_date(policy: &Policy, issued_at: DateTime<Utc>) -> DateTime<Utc> {
    issued_at + Duration::days(policy.loan_period_days)
}

pub fn is_overdue(now: DateTime<Utc>, due_date: DateTime<Utc>, status: LoanStatus) -> bool {
    status != LoanStatus::Returned && now > due_date
}

/// Whole days elapsed past the due date, counting only completed days.
pub fn days_overdue(now: DateTime<Utc>, due_date: DateTime<Utc>) -> i64 {
    (now - due_date).num_days().max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanState {
    pub status: LoanStatus,
    pub overdue: bool,
    pub days_overdue: i64,
    pub fine: f64,
}

/// Display state of a loan at `now`. Pure: the stored row is not touched.
/// Returned loans keep the fine that was settled when they came back.
pub fn loan_state(
    policy: &Policy,
    now: DateTime<Utc>,
    due_date: DateTime<Utc>,
    stored_status: LoanStatus,
    stored_fine: f64,
) -> LoanState {
    if stored_status == LoanStatus::Returned {
        return LoanState {
            status: LoanStatus::Returned,
            overdue: false,
            days_overdue: 0,
            fine: stored_fine,
        };
    }
    if !is_overdue(now, due_date, stored_status) {
        return LoanState {
            status: stored_status,
            overdue: false,
            days_overdue: 0,
            fine: stored_fine,
        };
    }
    let days = days_overdue(now, due_date);
    LoanState {
        status: LoanStatus::Overdue,
        overdue: true,
        days_overdue: days,
        fine: days as f64 * policy.fine_per_day,
    }
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
