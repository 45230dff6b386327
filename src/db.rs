use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, TrackError};
use crate::models::{Application, DailyEmailStat, EmailRecord, JobStatus, Recruiter};

/// Handle over the local SQLite store. All engine operations hang off this
/// type; higher-level modules add their own `impl Database` blocks.
///
/// Single-writer by design: quota accounting does a read-then-write on the
/// daily counter, which would race under concurrent writers. Acceptable for
/// a one-user batch tool; a second writer is not supported.
pub struct Database {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_path())
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // WAL lets a reader (the stats/list commands) coexist with the
        // sending run; foreign keys are off by default in SQLite.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store for tests; each call gets an isolated database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn default_path() -> PathBuf {
        // XDG data directory or fallback to the working directory
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "outreach") {
            proj_dirs.data_dir().join("outreach.db")
        } else {
            PathBuf::from("outreach.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                row_key TEXT NOT NULL UNIQUE,
                sheet_name TEXT,
                company TEXT NOT NULL,
                position TEXT NOT NULL,
                location TEXT,
                posting_url TEXT,
                expected_salary TEXT,
                custom_message TEXT,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN (
                    'draft', 'reached_out', 'applied', 'interview_scheduled',
                    'in_progress', 'closed', 'rejected', 'accepted')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                first_contacted_at TEXT,
                applied_at TEXT,
                closed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS recruiters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS application_recruiters (
                application_id INTEGER NOT NULL REFERENCES applications(id),
                recruiter_id INTEGER NOT NULL REFERENCES recruiters(id),
                PRIMARY KEY (application_id, recruiter_id)
            );

            CREATE TABLE IF NOT EXISTS email_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL REFERENCES applications(id),
                recruiter_id INTEGER NOT NULL REFERENCES recruiters(id),
                kind TEXT NOT NULL CHECK (kind IN ('first_contact', 'follow_up', 'other')),
                sequence INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                recipient_name TEXT,
                status TEXT NOT NULL CHECK (status IN ('sent', 'failed', 'bounced')),
                error TEXT,
                created_at TEXT NOT NULL,
                sent_at TEXT
            );

            CREATE TABLE IF NOT EXISTS daily_email_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day TEXT NOT NULL UNIQUE,
                emails_sent INTEGER NOT NULL DEFAULT 0,
                last_sent_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_email_records_pair
                ON email_records(application_id, recruiter_id);
            CREATE INDEX IF NOT EXISTS idx_applications_status
                ON applications(status);

            -- Storage-level backstop for the at-most-once first contact rule.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_first_contact_once
                ON email_records(application_id, recruiter_id)
                WHERE kind = 'first_contact' AND status = 'sent';
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(TrackError::Validation(
                "database not initialized, run 'outreach init' first".into(),
            ));
        }
        Ok(())
    }

    // --- Application reads ---

    pub fn get_application(&self, id: i64) -> Result<Option<Application>> {
        let app = self
            .conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                [id],
                Self::row_to_application,
            )
            .optional()?;
        Ok(app)
    }

    pub fn get_application_by_row_key(&self, row_key: &str) -> Result<Option<Application>> {
        let app = self
            .conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE row_key = ?1"),
                [row_key],
                Self::row_to_application,
            )
            .optional()?;
        Ok(app)
    }

    pub fn list_applications(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Application>> {
        let mut sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications");
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT {limit}"));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Recruiter reads ---

    pub fn get_recruiter(&self, id: i64) -> Result<Option<Recruiter>> {
        let rec = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at, updated_at FROM recruiters WHERE id = ?1",
                [id],
                Self::row_to_recruiter,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn get_recruiter_by_email(&self, email: &str) -> Result<Option<Recruiter>> {
        let rec = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at, updated_at
                 FROM recruiters WHERE email = ?1 COLLATE NOCASE",
                [email],
                Self::row_to_recruiter,
            )
            .optional()?;
        Ok(rec)
    }

    /// Recruiters linked to an application, in the order they were attached.
    /// Attachment order mirrors the sheet's listed priority, so the link
    /// table's rowid is the sort key.
    pub fn linked_recruiters(&self, application_id: i64) -> Result<Vec<Recruiter>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.name, r.email, r.created_at, r.updated_at
             FROM recruiters r
             JOIN application_recruiters ar ON ar.recruiter_id = r.id
             WHERE ar.application_id = ?1
             ORDER BY ar.rowid",
        )?;
        let rows = stmt.query_map([application_id], Self::row_to_recruiter)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // --- Email record reads ---

    pub fn get_email_record(&self, id: i64) -> Result<Option<EmailRecord>> {
        let rec = self
            .conn
            .query_row(
                &format!("SELECT {EMAIL_RECORD_COLUMNS} FROM email_records WHERE id = ?1"),
                [id],
                Self::row_to_email_record,
            )
            .optional()?;
        Ok(rec)
    }

    /// Full send history for an application, newest first.
    pub fn email_history(&self, application_id: i64) -> Result<Vec<EmailRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EMAIL_RECORD_COLUMNS} FROM email_records
             WHERE application_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([application_id], Self::row_to_email_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn daily_stat(&self, day: chrono::NaiveDate) -> Result<Option<DailyEmailStat>> {
        let stat = self
            .conn
            .query_row(
                "SELECT id, day, emails_sent, last_sent_at FROM daily_email_stats WHERE day = ?1",
                params![day],
                |row| {
                    Ok(DailyEmailStat {
                        id: row.get(0)?,
                        day: row.get(1)?,
                        emails_sent: row.get(2)?,
                        last_sent_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(stat)
    }

    // --- Row mappers ---

    pub(crate) fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            row_key: row.get(1)?,
            sheet_name: row.get(2)?,
            company: row.get(3)?,
            position: row.get(4)?,
            location: row.get(5)?,
            posting_url: row.get(6)?,
            expected_salary: row.get(7)?,
            custom_message: row.get(8)?,
            notes: row.get(9)?,
            status: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            first_contacted_at: row.get(13)?,
            applied_at: row.get(14)?,
            closed_at: row.get(15)?,
        })
    }

    pub(crate) fn row_to_recruiter(row: &rusqlite::Row) -> rusqlite::Result<Recruiter> {
        Ok(Recruiter {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    pub(crate) fn row_to_email_record(row: &rusqlite::Row) -> rusqlite::Result<EmailRecord> {
        Ok(EmailRecord {
            id: row.get(0)?,
            application_id: row.get(1)?,
            recruiter_id: row.get(2)?,
            kind: row.get(3)?,
            sequence: row.get(4)?,
            subject: row.get(5)?,
            recipient_email: row.get(6)?,
            recipient_name: row.get(7)?,
            status: row.get(8)?,
            error: row.get(9)?,
            created_at: row.get(10)?,
            sent_at: row.get(11)?,
        })
    }
}

pub(crate) const APPLICATION_COLUMNS: &str = "id, row_key, sheet_name, company, position, \
     location, posting_url, expected_salary, custom_message, notes, status, \
     created_at, updated_at, first_contacted_at, applied_at, closed_at";

pub(crate) const EMAIL_RECORD_COLUMNS: &str = "id, application_id, recruiter_id, kind, sequence, \
     subject, recipient_email, recipient_name, status, error, created_at, sent_at";
