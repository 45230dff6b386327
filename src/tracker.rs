//! Application registry, delivery recording and derived statistics.
//!
//! Everything that mutates the store lives here, one transaction per unit of
//! work. Re-running the same input is safe: upserts are keyed by `row_key`
//! and recording a duplicate first contact is rejected.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::contacts::validate_email;
use crate::db::{Database, APPLICATION_COLUMNS};
use crate::error::{Result, TrackError};
use crate::models::{
    Application, Contact, DeliveryStatus, EmailKind, EmailRecord, JobStatus, Statistics,
};
use crate::ratelimit;

/// Input for the idempotent registry upsert, one per source row.
#[derive(Debug, Clone, Default)]
pub struct ApplicationUpsert {
    pub row_key: String,
    pub sheet_name: Option<String>,
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub posting_url: Option<String>,
    pub expected_salary: Option<String>,
    pub custom_message: Option<String>,
    pub contacts: Vec<Contact>,
}

/// One send attempt to record, success or failure.
#[derive(Debug, Clone)]
pub struct SendAttempt {
    pub application_id: i64,
    pub recruiter_id: i64,
    pub kind: EmailKind,
    pub sequence: i64,
    pub subject: String,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub outcome: DeliveryStatus,
    pub error: Option<String>,
}

impl Database {
    /// Creates or updates the application for a source row.
    ///
    /// Exactly one application ever exists per `row_key`. Descriptive fields
    /// are refreshed from non-empty incoming values only; an empty cell never
    /// clobbers a stored value. Newly seen recruiters are attached to the
    /// link set, and re-attaching an already linked recruiter is a no-op.
    pub fn upsert_application(
        &mut self,
        now: DateTime<Utc>,
        input: &ApplicationUpsert,
    ) -> Result<Application> {
        if input.row_key.trim().is_empty() {
            return Err(TrackError::Validation("row_key must not be empty".into()));
        }
        if input.company.trim().is_empty() || input.position.trim().is_empty() {
            return Err(TrackError::Validation(format!(
                "company and position are required for row {}",
                input.row_key
            )));
        }

        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM applications WHERE row_key = ?1",
                [&input.row_key],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE applications SET
                        company = ?1,
                        position = ?2,
                        sheet_name = COALESCE(?3, sheet_name),
                        location = COALESCE(?4, location),
                        posting_url = COALESCE(?5, posting_url),
                        expected_salary = COALESCE(?6, expected_salary),
                        custom_message = COALESCE(?7, custom_message),
                        updated_at = ?8
                     WHERE id = ?9",
                    params![
                        input.company.trim(),
                        input.position.trim(),
                        non_empty(input.sheet_name.as_deref()),
                        non_empty(input.location.as_deref()),
                        non_empty(input.posting_url.as_deref()),
                        non_empty(input.expected_salary.as_deref()),
                        non_empty(input.custom_message.as_deref()),
                        now,
                        id,
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO applications
                        (row_key, sheet_name, company, position, location, posting_url,
                         expected_salary, custom_message, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        input.row_key,
                        non_empty(input.sheet_name.as_deref()),
                        input.company.trim(),
                        input.position.trim(),
                        non_empty(input.location.as_deref()),
                        non_empty(input.posting_url.as_deref()),
                        non_empty(input.expected_salary.as_deref()),
                        non_empty(input.custom_message.as_deref()),
                        JobStatus::Draft,
                        now,
                        now,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                info!(
                    row_key = %input.row_key,
                    company = %input.company,
                    position = %input.position,
                    recruiters = input.contacts.len(),
                    "created application"
                );
                id
            }
        };

        link_contacts(&tx, id, &input.contacts, now)?;

        let app = tx.query_row(
            &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
            [id],
            Database::row_to_application,
        )?;
        tx.commit()?;
        Ok(app)
    }

    /// Writes the immutable record for one send attempt.
    ///
    /// On a successful outcome this also advances `draft -> reached_out` (the
    /// application's first send only) and bumps the daily quota counter, all
    /// in one transaction: a crash can never leave the record, the status and
    /// the counter disagreeing about what was sent.
    pub fn record_send_outcome(
        &mut self,
        now: DateTime<Utc>,
        attempt: &SendAttempt,
    ) -> Result<EmailRecord> {
        if !validate_email(&attempt.recipient_email) {
            return Err(TrackError::Validation(format!(
                "invalid recipient email: {}",
                attempt.recipient_email
            )));
        }
        match (attempt.kind, attempt.sequence) {
            (EmailKind::FirstContact, 0) => {}
            (EmailKind::FirstContact, n) => {
                return Err(TrackError::Validation(format!(
                    "first contact must have sequence 0, got {n}"
                )));
            }
            (EmailKind::FollowUp, n) if n < 1 => {
                return Err(TrackError::Validation(format!(
                    "follow-up sequence must be >= 1, got {n}"
                )));
            }
            _ => {}
        }
        if attempt.outcome == DeliveryStatus::Bounced {
            return Err(TrackError::Validation(
                "bounces are observed after the fact, record the attempt as sent".into(),
            ));
        }

        let tx = self.conn.transaction()?;

        let status: Option<JobStatus> = tx
            .query_row(
                "SELECT status FROM applications WHERE id = ?1",
                [attempt.application_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Err(TrackError::ApplicationNotFound(attempt.application_id));
        };
        let recruiter_exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM recruiters WHERE id = ?1",
                [attempt.recruiter_id],
                |row| row.get(0),
            )
            .optional()?;
        if recruiter_exists.is_none() {
            return Err(TrackError::RecruiterNotFound(attempt.recruiter_id));
        }

        if attempt.kind == EmailKind::FirstContact {
            let already_sent: i64 = tx.query_row(
                "SELECT COUNT(*) FROM email_records
                 WHERE application_id = ?1 AND recruiter_id = ?2
                   AND kind = 'first_contact' AND status = 'sent'",
                params![attempt.application_id, attempt.recruiter_id],
                |row| row.get(0),
            )?;
            if already_sent > 0 {
                return Err(TrackError::DuplicateSend {
                    application_id: attempt.application_id,
                    recruiter_id: attempt.recruiter_id,
                });
            }
        }

        if attempt.kind == EmailKind::FollowUp && attempt.outcome == DeliveryStatus::Sent {
            // Numbering drift is detectable but never auto-corrected here.
            let sent_followups: i64 = tx.query_row(
                "SELECT COUNT(*) FROM email_records
                 WHERE application_id = ?1 AND recruiter_id = ?2
                   AND kind = 'follow_up' AND status = 'sent'",
                params![attempt.application_id, attempt.recruiter_id],
                |row| row.get(0),
            )?;
            if attempt.sequence != sent_followups + 1 {
                warn!(
                    application_id = attempt.application_id,
                    recruiter_id = attempt.recruiter_id,
                    expected = sent_followups + 1,
                    got = attempt.sequence,
                    "follow-up numbering drift"
                );
            }
        }

        let sent_at = (attempt.outcome == DeliveryStatus::Sent).then_some(now);
        tx.execute(
            "INSERT INTO email_records
                (application_id, recruiter_id, kind, sequence, subject,
                 recipient_email, recipient_name, status, error, created_at, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                attempt.application_id,
                attempt.recruiter_id,
                attempt.kind,
                attempt.sequence,
                attempt.subject,
                attempt.recipient_email,
                attempt.recipient_name,
                attempt.outcome,
                attempt.error,
                now,
                sent_at,
            ],
        )?;
        let record_id = tx.last_insert_rowid();

        if attempt.outcome == DeliveryStatus::Sent {
            if status == JobStatus::Draft {
                tx.execute(
                    "UPDATE applications
                     SET status = ?1, first_contacted_at = ?2, updated_at = ?2
                     WHERE id = ?3",
                    params![JobStatus::ReachedOut, now, attempt.application_id],
                )?;
            }
            ratelimit::bump_daily_stat(&tx, now)?;
            info!(
                application_id = attempt.application_id,
                recruiter_id = attempt.recruiter_id,
                kind = %attempt.kind,
                sequence = attempt.sequence,
                "recorded sent email"
            );
        } else {
            warn!(
                application_id = attempt.application_id,
                recipient = %attempt.recipient_email,
                error = attempt.error.as_deref().unwrap_or("unknown"),
                "recorded failed email"
            );
        }

        let record = tx.query_row(
            &format!(
                "SELECT {} FROM email_records WHERE id = ?1",
                crate::db::EMAIL_RECORD_COLUMNS
            ),
            [record_id],
            Database::row_to_email_record,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Manual status override, used by external callers (dashboard, CLI).
    /// Deliberately permissive: job outcomes are externally driven, so no
    /// transition ordering is enforced.
    pub fn update_job_status(
        &self,
        now: DateTime<Utc>,
        application_id: i64,
        status: JobStatus,
        notes: Option<&str>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications SET
                status = ?1,
                notes = COALESCE(?2, notes),
                applied_at = CASE WHEN ?1 = 'applied' THEN ?3 ELSE applied_at END,
                closed_at = CASE WHEN ?4 THEN ?3 ELSE closed_at END,
                updated_at = ?3
             WHERE id = ?5",
            params![status, notes, now, status.is_terminal(), application_id],
        )?;
        if changed == 0 {
            return Err(TrackError::ApplicationNotFound(application_id));
        }
        info!(application_id, status = %status, "updated application status");
        Ok(())
    }

    /// Fresh derived counts; staleness is "as of last commit".
    pub fn get_statistics(&self) -> Result<Statistics> {
        let total_applications: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))?;
        let total_emails_sent: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_records WHERE status = 'sent'",
            [],
            |row| row.get(0),
        )?;
        let followups_sent: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_records WHERE kind = 'follow_up' AND status = 'sent'",
            [],
            |row| row.get(0),
        )?;

        let mut by_status = std::collections::BTreeMap::new();
        for status in JobStatus::ALL {
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM applications WHERE status = ?1",
                [status],
                |row| row.get(0),
            )?;
            by_status.insert(status, count);
        }

        Ok(Statistics {
            total_applications,
            total_emails_sent,
            followups_sent,
            by_status,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Get-or-create each recruiter by address and attach it to the application.
/// Display names are last-seen-wins; the link insert ignores duplicates.
fn link_contacts(
    conn: &Connection,
    application_id: i64,
    contacts: &[Contact],
    now: DateTime<Utc>,
) -> Result<()> {
    for contact in contacts {
        if !validate_email(&contact.email) {
            warn!(email = %contact.email, "skipping contact with invalid email");
            continue;
        }

        let existing: Option<(i64, Option<String>)> = conn
            .query_row(
                "SELECT id, name FROM recruiters WHERE email = ?1 COLLATE NOCASE",
                [&contact.email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let recruiter_id = match existing {
            Some((id, stored_name)) => {
                if contact.name.is_some() && contact.name != stored_name {
                    conn.execute(
                        "UPDATE recruiters SET name = ?1, updated_at = ?2 WHERE id = ?3",
                        params![contact.name, now, id],
                    )?;
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO recruiters (name, email, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![contact.name, contact.email, now, now],
                )?;
                conn.last_insert_rowid()
            }
        };

        conn.execute(
            "INSERT OR IGNORE INTO application_recruiters (application_id, recruiter_id)
             VALUES (?1, ?2)",
            params![application_id, recruiter_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
    }

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn acme_row() -> ApplicationUpsert {
        ApplicationUpsert {
            row_key: "S1:2".into(),
            company: "Acme".into(),
            position: "Engineer".into(),
            location: Some("Berlin".into()),
            contacts: vec![
                Contact {
                    name: Some("Jo".into()),
                    email: "jo@acme.com".into(),
                },
                Contact {
                    name: Some("Sam".into()),
                    email: "sam@acme.com".into(),
                },
            ],
            ..Default::default()
        }
    }

    fn sent_attempt(app_id: i64, recruiter_id: i64, email: &str) -> SendAttempt {
        SendAttempt {
            application_id: app_id,
            recruiter_id,
            kind: EmailKind::FirstContact,
            sequence: 0,
            subject: "Application for Engineer Position at Acme".into(),
            recipient_email: email.into(),
            recipient_name: None,
            outcome: DeliveryStatus::Sent,
            error: None,
        }
    }

    #[test]
    fn upsert_creates_application_with_draft_status() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        assert_eq!(app.status, JobStatus::Draft);
        assert_eq!(app.row_key, "S1:2");
        assert_eq!(db.linked_recruiters(app.id).unwrap().len(), 2);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut db = db();
        let first = db.upsert_application(now(), &acme_row()).unwrap();
        let second = db.upsert_application(now(), &acme_row()).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.get_statistics().unwrap().total_applications, 1);
        assert_eq!(db.linked_recruiters(first.id).unwrap().len(), 2);
        assert_eq!(second.company, "Acme");
        assert_eq!(second.location.as_deref(), Some("Berlin"));
    }

    #[test]
    fn upsert_never_clobbers_stored_values_with_empty_input() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();

        let mut sparse = acme_row();
        sparse.location = None;
        let updated = db.upsert_application(now(), &sparse).unwrap();
        assert_eq!(updated.id, app.id);
        assert_eq!(updated.location.as_deref(), Some("Berlin"));

        sparse.location = Some("".into());
        let updated = db.upsert_application(now(), &sparse).unwrap();
        assert_eq!(updated.location.as_deref(), Some("Berlin"));
    }

    #[test]
    fn upsert_refreshes_changed_descriptive_fields() {
        let mut db = db();
        db.upsert_application(now(), &acme_row()).unwrap();

        let mut moved = acme_row();
        moved.location = Some("Remote".into());
        moved.posting_url = Some("https://acme.example/jobs/1".into());
        let updated = db.upsert_application(now(), &moved).unwrap();
        assert_eq!(updated.location.as_deref(), Some("Remote"));
        assert_eq!(
            updated.posting_url.as_deref(),
            Some("https://acme.example/jobs/1")
        );
    }

    #[test]
    fn upsert_rejects_missing_required_fields() {
        let mut db = db();
        let mut row = acme_row();
        row.company = "  ".into();
        assert!(matches!(
            db.upsert_application(now(), &row),
            Err(TrackError::Validation(_))
        ));

        let mut row = acme_row();
        row.row_key = "".into();
        assert!(matches!(
            db.upsert_application(now(), &row),
            Err(TrackError::Validation(_))
        ));
    }

    #[test]
    fn recruiter_name_is_last_seen_wins() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();

        let mut renamed = acme_row();
        renamed.contacts[0].name = Some("Joanna".into());
        db.upsert_application(now(), &renamed).unwrap();

        let recruiters = db.linked_recruiters(app.id).unwrap();
        assert_eq!(recruiters[0].name.as_deref(), Some("Joanna"));
        // Still two recruiters: same address, no duplicate row.
        assert_eq!(recruiters.len(), 2);
    }

    #[test]
    fn recruiters_are_shared_across_applications_by_address() {
        let mut db = db();
        let a = db.upsert_application(now(), &acme_row()).unwrap();
        let mut other = acme_row();
        other.row_key = "S1:3".into();
        other.position = "Manager".into();
        let b = db.upsert_application(now(), &other).unwrap();

        let jo_a = &db.linked_recruiters(a.id).unwrap()[0];
        let jo_b = &db.linked_recruiters(b.id).unwrap()[0];
        assert_eq!(jo_a.id, jo_b.id);
    }

    #[test]
    fn first_successful_send_advances_draft_to_reached_out() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let recruiters = db.linked_recruiters(app.id).unwrap();

        db.record_send_outcome(now(), &sent_attempt(app.id, recruiters[0].id, "jo@acme.com"))
            .unwrap();
        let app = db.get_application(app.id).unwrap().unwrap();
        assert_eq!(app.status, JobStatus::ReachedOut);
        assert_eq!(app.first_contacted_at, Some(now()));

        // A second successful send does not change status further.
        db.record_send_outcome(
            now(),
            &sent_attempt(app.id, recruiters[1].id, "sam@acme.com"),
        )
        .unwrap();
        let app = db.get_application(app.id).unwrap().unwrap();
        assert_eq!(app.status, JobStatus::ReachedOut);
    }

    #[test]
    fn duplicate_first_contact_is_rejected() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();

        db.record_send_outcome(now(), &sent_attempt(app.id, jo.id, "jo@acme.com"))
            .unwrap();
        let err = db
            .record_send_outcome(now(), &sent_attempt(app.id, jo.id, "jo@acme.com"))
            .unwrap_err();
        assert!(matches!(err, TrackError::DuplicateSend { .. }));
        assert_eq!(db.get_statistics().unwrap().total_emails_sent, 1);
    }

    #[test]
    fn failed_first_contact_does_not_block_retry() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();

        let mut failed = sent_attempt(app.id, jo.id, "jo@acme.com");
        failed.outcome = DeliveryStatus::Failed;
        failed.error = Some("transport unavailable".into());
        db.record_send_outcome(now(), &failed).unwrap();

        // Status unchanged, then the retry succeeds.
        let app_after = db.get_application(app.id).unwrap().unwrap();
        assert_eq!(app_after.status, JobStatus::Draft);
        db.record_send_outcome(now(), &sent_attempt(app.id, jo.id, "jo@acme.com"))
            .unwrap();
        assert_eq!(db.email_history(app.id).unwrap().len(), 2);
    }

    #[test]
    fn record_rejects_invalid_recipient_and_unknown_ids() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();

        let mut bad = sent_attempt(app.id, jo.id, "not-an-email");
        bad.recipient_email = "not-an-email".into();
        assert!(matches!(
            db.record_send_outcome(now(), &bad),
            Err(TrackError::Validation(_))
        ));
        assert!(matches!(
            db.record_send_outcome(now(), &sent_attempt(999, jo.id, "jo@acme.com")),
            Err(TrackError::ApplicationNotFound(999))
        ));
        assert!(matches!(
            db.record_send_outcome(now(), &sent_attempt(app.id, 999, "jo@acme.com")),
            Err(TrackError::RecruiterNotFound(999))
        ));
        // No partial state written.
        assert!(db.email_history(app.id).unwrap().is_empty());
    }

    #[test]
    fn record_rejects_incoherent_kind_and_sequence() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();

        let mut bad = sent_attempt(app.id, jo.id, "jo@acme.com");
        bad.sequence = 1;
        assert!(matches!(
            db.record_send_outcome(now(), &bad),
            Err(TrackError::Validation(_))
        ));

        let mut bad = sent_attempt(app.id, jo.id, "jo@acme.com");
        bad.kind = EmailKind::FollowUp;
        bad.sequence = 0;
        assert!(matches!(
            db.record_send_outcome(now(), &bad),
            Err(TrackError::Validation(_))
        ));
    }

    #[test]
    fn update_status_is_permissive_and_stamps_timestamps() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();

        db.update_job_status(now(), app.id, JobStatus::Rejected, Some("form reply"))
            .unwrap();
        let app = db.get_application(app.id).unwrap().unwrap();
        assert_eq!(app.status, JobStatus::Rejected);
        assert_eq!(app.notes.as_deref(), Some("form reply"));
        assert_eq!(app.closed_at, Some(now()));

        // "Backward" transition is allowed.
        db.update_job_status(now(), app.id, JobStatus::Applied, None)
            .unwrap();
        let app = db.get_application(app.id).unwrap().unwrap();
        assert_eq!(app.status, JobStatus::Applied);
        assert_eq!(app.applied_at, Some(now()));
        assert_eq!(app.notes.as_deref(), Some("form reply"));
    }

    #[test]
    fn update_status_unknown_application_errors() {
        let db = db();
        assert!(matches!(
            db.update_job_status(now(), 42, JobStatus::Closed, None),
            Err(TrackError::ApplicationNotFound(42))
        ));
    }

    #[test]
    fn statistics_count_sent_and_followups() {
        let mut db = db();
        let app = db.upsert_application(now(), &acme_row()).unwrap();
        let recruiters = db.linked_recruiters(app.id).unwrap();
        db.record_send_outcome(now(), &sent_attempt(app.id, recruiters[0].id, "jo@acme.com"))
            .unwrap();

        let mut followup = sent_attempt(app.id, recruiters[0].id, "jo@acme.com");
        followup.kind = EmailKind::FollowUp;
        followup.sequence = 1;
        db.record_send_outcome(now(), &followup).unwrap();

        let mut failed = sent_attempt(app.id, recruiters[1].id, "sam@acme.com");
        failed.outcome = DeliveryStatus::Failed;
        db.record_send_outcome(now(), &failed).unwrap();

        let stats = db.get_statistics().unwrap();
        assert_eq!(stats.total_applications, 1);
        assert_eq!(stats.total_emails_sent, 2);
        assert_eq!(stats.followups_sent, 1);
        assert_eq!(stats.by_status[&JobStatus::ReachedOut], 1);
        assert_eq!(stats.by_status[&JobStatus::Draft], 0);
    }
}
