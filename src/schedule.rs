//! Send eligibility and follow-up scheduling.
//!
//! Both passes are pure reads over the send history: re-running them after an
//! interrupted batch simply skips pairs that were already contacted.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::contacts::validate_email;
use crate::db::Database;
use crate::error::{Result, TrackError};
use crate::models::{Application, Recruiter};

/// A (application, recruiter) pair due for its next follow-up.
#[derive(Debug, Clone)]
pub struct FollowupCandidate {
    pub application: Application,
    pub recruiter: Recruiter,
    /// 1 for the first follow-up, strictly increasing per pair.
    pub sequence: i64,
}

impl Database {
    /// Linked recruiters who have not yet received a sent first contact for
    /// this application, in attachment order. A failed attempt does not
    /// block the pair; only a sent record does. Recruiters whose stored
    /// address fails validation are skipped.
    pub fn first_contact_candidates(&self, application_id: i64) -> Result<Vec<Recruiter>> {
        if self.get_application(application_id)?.is_none() {
            return Err(TrackError::ApplicationNotFound(application_id));
        }

        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.name, r.email, r.created_at, r.updated_at
             FROM recruiters r
             JOIN application_recruiters ar ON ar.recruiter_id = r.id
             WHERE ar.application_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM email_records e
                   WHERE e.application_id = ar.application_id
                     AND e.recruiter_id = r.id
                     AND e.kind = 'first_contact'
                     AND e.status = 'sent')
             ORDER BY ar.rowid",
        )?;
        let rows = stmt.query_map([application_id], Database::row_to_recruiter)?;
        let recruiters = rows
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|r| validate_email(&r.email))
            .collect();
        Ok(recruiters)
    }

    /// True iff the recruiter's address is syntactically valid and the pair
    /// has no sent first-contact record yet.
    pub fn is_eligible_recipient(&self, application_id: i64, recruiter_id: i64) -> Result<bool> {
        if self.get_application(application_id)?.is_none() {
            return Err(TrackError::ApplicationNotFound(application_id));
        }
        let recruiter = self
            .get_recruiter(recruiter_id)?
            .ok_or(TrackError::RecruiterNotFound(recruiter_id))?;
        if !validate_email(&recruiter.email) {
            return Ok(false);
        }

        let sent: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_records
             WHERE application_id = ?1 AND recruiter_id = ?2
               AND kind = 'first_contact' AND status = 'sent'",
            params![application_id, recruiter_id],
            |row| row.get(0),
        )?;
        Ok(sent == 0)
    }

    /// Pairs due for a follow-up: a sent first contact exists, the
    /// application is not resolved, at least `cooldown_days` whole days have
    /// passed since the pair's last sent email, and fewer than
    /// `max_followups` follow-ups have gone out.
    ///
    /// The cooldown compares calendar dates, not sub-day elapsed time, so a
    /// follow-up becomes due at the day boundary rather than at whatever
    /// hour the first email happened to go out. Candidates are returned as a
    /// set in stable (application, recruiter) id order; iteration priority
    /// is the caller's policy.
    pub fn followup_candidates(
        &self,
        now: DateTime<Utc>,
        cooldown_days: i64,
        max_followups: i64,
    ) -> Result<Vec<FollowupCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.application_id, e.recruiter_id,
                    MAX(s.sent_at) AS last_sent,
                    (SELECT COUNT(*) FROM email_records f
                     WHERE f.application_id = e.application_id
                       AND f.recruiter_id = e.recruiter_id
                       AND f.kind = 'follow_up' AND f.status = 'sent') AS followups
             FROM email_records e
             JOIN applications a ON a.id = e.application_id
             JOIN email_records s ON s.application_id = e.application_id
                                 AND s.recruiter_id = e.recruiter_id
                                 AND s.status = 'sent'
             WHERE e.kind = 'first_contact' AND e.status = 'sent'
               AND a.status NOT IN ('closed', 'rejected', 'accepted')
             GROUP BY e.application_id, e.recruiter_id
             ORDER BY e.application_id, e.recruiter_id",
        )?;

        let pairs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, DateTime<Utc>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut candidates = Vec::new();
        for (application_id, recruiter_id, last_sent, followups) in pairs {
            if followups >= max_followups {
                continue;
            }
            let elapsed_days = (now.date_naive() - last_sent.date_naive()).num_days();
            if elapsed_days < cooldown_days {
                continue;
            }
            let application = self
                .get_application(application_id)?
                .ok_or(TrackError::ApplicationNotFound(application_id))?;
            let recruiter = self
                .get_recruiter(recruiter_id)?
                .ok_or(TrackError::RecruiterNotFound(recruiter_id))?;
            candidates.push(FollowupCandidate {
                application,
                recruiter,
                sequence: followups + 1,
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contact, DeliveryStatus, EmailKind, JobStatus};
    use crate::tracker::{ApplicationUpsert, SendAttempt};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 17, 30, 0).unwrap()
    }

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn upsert(db: &mut Database, row_key: &str, emails: &[&str]) -> Application {
        let input = ApplicationUpsert {
            row_key: row_key.into(),
            company: "Acme".into(),
            position: "Engineer".into(),
            contacts: emails
                .iter()
                .map(|e| Contact {
                    name: None,
                    email: (*e).into(),
                })
                .collect(),
            ..Default::default()
        };
        db.upsert_application(now(), &input).unwrap()
    }

    fn record(
        db: &mut Database,
        at: DateTime<Utc>,
        app_id: i64,
        recruiter: &Recruiter,
        kind: EmailKind,
        sequence: i64,
        outcome: DeliveryStatus,
    ) {
        db.record_send_outcome(
            at,
            &SendAttempt {
                application_id: app_id,
                recruiter_id: recruiter.id,
                kind,
                sequence,
                subject: "subject".into(),
                recipient_email: recruiter.email.clone(),
                recipient_name: recruiter.name.clone(),
                outcome,
                error: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn candidates_follow_attachment_order_and_shrink_after_sends() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com", "sam@acme.com"]);

        let candidates = db.first_contact_candidates(app.id).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].email, "jo@acme.com");
        assert_eq!(candidates[1].email, "sam@acme.com");

        let jo = candidates[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );
        let candidates = db.first_contact_candidates(app.id).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].email, "sam@acme.com");
        assert!(!db.is_eligible_recipient(app.id, jo.id).unwrap());
    }

    #[test]
    fn application_without_recruiters_yields_no_candidates() {
        let mut db = db();
        let app = upsert(&mut db, "S1:9", &[]);
        assert!(db.first_contact_candidates(app.id).unwrap().is_empty());
    }

    #[test]
    fn unknown_application_errors() {
        let db = db();
        assert!(matches!(
            db.first_contact_candidates(7),
            Err(TrackError::ApplicationNotFound(7))
        ));
    }

    #[test]
    fn failed_attempt_keeps_pair_eligible() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com"]);
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Failed,
        );
        assert_eq!(db.first_contact_candidates(app.id).unwrap().len(), 1);
        assert!(db.is_eligible_recipient(app.id, jo.id).unwrap());
    }

    #[test]
    fn cooldown_uses_whole_day_granularity() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com"]);
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );

        // 3 days later: too soon for a 7-day cooldown.
        let later = now() + Duration::days(3);
        assert!(db.followup_candidates(later, 7, 3).unwrap().is_empty());

        // Exactly 7 calendar days later it is due, even if fewer than
        // 7 * 24h have elapsed.
        let due = Utc.with_ymd_and_hms(2026, 8, 8, 6, 0, 0).unwrap();
        let candidates = db.followup_candidates(due, 7, 3).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sequence, 1);
        assert_eq!(candidates[0].recruiter.email, "jo@acme.com");
    }

    #[test]
    fn followup_cap_is_enforced() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com"]);
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );
        let mut at = now();
        for seq in 1..=2 {
            at += Duration::days(8);
            record(
                &mut db,
                at,
                app.id,
                &jo,
                EmailKind::FollowUp,
                seq,
                DeliveryStatus::Sent,
            );
        }

        let later = at + Duration::days(30);
        let candidates = db.followup_candidates(later, 7, 2).unwrap();
        assert!(candidates.is_empty());

        // Raising the cap makes the pair due again with the next number.
        let candidates = db.followup_candidates(later, 7, 3).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sequence, 3);
    }

    #[test]
    fn cooldown_counts_from_the_last_sent_email_of_any_kind() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com"]);
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );
        let followup_at = now() + Duration::days(8);
        record(
            &mut db,
            followup_at,
            app.id,
            &jo,
            EmailKind::FollowUp,
            1,
            DeliveryStatus::Sent,
        );

        // 9 days after first contact is only 1 day after the follow-up.
        assert!(db
            .followup_candidates(now() + Duration::days(9), 7, 3)
            .unwrap()
            .is_empty());
        let candidates = db
            .followup_candidates(followup_at + Duration::days(7), 7, 3)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sequence, 2);
    }

    #[test]
    fn terminal_statuses_are_excluded_from_followups() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com"]);
        let jo = db.linked_recruiters(app.id).unwrap()[0].clone();
        record(
            &mut db,
            now(),
            app.id,
            &jo,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );

        for status in [JobStatus::Closed, JobStatus::Rejected, JobStatus::Accepted] {
            db.update_job_status(now(), app.id, status, None).unwrap();
            assert!(db
                .followup_candidates(now() + Duration::days(30), 7, 3)
                .unwrap()
                .is_empty());
        }

        // Reopened applications become due again.
        db.update_job_status(now(), app.id, JobStatus::InProgress, None)
            .unwrap();
        assert_eq!(
            db.followup_candidates(now() + Duration::days(30), 7, 3)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn pairs_without_sent_first_contact_are_never_due() {
        let mut db = db();
        let app = upsert(&mut db, "S1:2", &["jo@acme.com", "sam@acme.com"]);
        let recruiters = db.linked_recruiters(app.id).unwrap();
        record(
            &mut db,
            now(),
            app.id,
            &recruiters[0],
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Sent,
        );
        let mut failed = recruiters[1].clone();
        failed.name = None;
        record(
            &mut db,
            now(),
            app.id,
            &failed,
            EmailKind::FirstContact,
            0,
            DeliveryStatus::Failed,
        );

        let candidates = db
            .followup_candidates(now() + Duration::days(10), 7, 3)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].recruiter.id, recruiters[0].id);
    }
}
