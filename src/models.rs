use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Lifecycle of a tracked application. Transitions are permissive on purpose:
/// outcomes are driven externally (a recruiter replies, an offer arrives), so
/// manual status updates may set any value. The engine itself only ever
/// advances `Draft -> ReachedOut` on the first successful send.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    ReachedOut,
    Applied,
    InterviewScheduled,
    InProgress,
    Closed,
    Rejected,
    Accepted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Draft,
        JobStatus::ReachedOut,
        JobStatus::Applied,
        JobStatus::InterviewScheduled,
        JobStatus::InProgress,
        JobStatus::Closed,
        JobStatus::Rejected,
        JobStatus::Accepted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::ReachedOut => "reached_out",
            JobStatus::Applied => "applied",
            JobStatus::InterviewScheduled => "interview_scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Closed => "closed",
            JobStatus::Rejected => "rejected",
            JobStatus::Accepted => "accepted",
        }
    }

    /// Resolved applications get no further follow-ups.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Closed | JobStatus::Rejected | JobStatus::Accepted
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    FirstContact,
    FollowUp,
    Other,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::FirstContact => "first_contact",
            EmailKind::FollowUp => "follow_up",
            EmailKind::Other => "other",
        }
    }
}

impl fmt::Display for EmailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_contact" => Ok(EmailKind::FirstContact),
            "follow_up" => Ok(EmailKind::FollowUp),
            "other" => Ok(EmailKind::Other),
            _ => Err(format!("unknown email kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "bounced" => Ok(DeliveryStatus::Bounced),
            _ => Err(format!("unknown delivery status: {s}")),
        }
    }
}

// Status enums are stored as TEXT with CHECK constraints; these impls let
// row mappers read and write them without string plumbing at every call site.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

sql_text_enum!(JobStatus);
sql_text_enum!(EmailKind);
sql_text_enum!(DeliveryStatus);

/// One parsed recruiter contact from a spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub email: String,
}

/// One tracked job opportunity, unique per source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub row_key: String,
    pub sheet_name: Option<String>,
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub posting_url: Option<String>,
    pub expected_salary: Option<String>,
    pub custom_message: Option<String>,
    pub notes: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_contacted_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One contact person, unique per email address (case-insensitive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recruiter {
    pub id: i64,
    pub name: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit entry for one send attempt. `sequence` is 0 for first
/// contact and 1..N for follow-ups; `sent_at` is NULL when the attempt never
/// made it to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: i64,
    pub application_id: i64,
    pub recruiter_id: i64,
    pub kind: EmailKind,
    pub sequence: i64,
    pub subject: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Per-calendar-day send accounting used by the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyEmailStat {
    pub id: i64,
    pub day: NaiveDate,
    pub emails_sent: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Derived counts computed fresh per call; nothing here is cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_applications: i64,
    pub total_emails_sent: i64,
    pub followups_sent: i64,
    pub by_status: BTreeMap<JobStatus, i64>,
}
