//! Daily send quota and inter-send delay accounting.
//!
//! `reserve_send_slot` is a pure read and `record_send` is the commit; the
//! split means a reservation followed by a transport failure never consumes
//! quota. The caller owns the wait/retry loop on `TooSoon` — nothing here
//! blocks.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Today's counter already reached the configured ceiling; retrying
    /// before the next day boundary is pointless.
    DailyLimitReached { sent: i64, limit: u32 },
    /// The minimum inter-send delay has not elapsed; wait and retry.
    TooSoon { wait: Duration },
}

impl Database {
    /// Checks today's quota without consuming it. "Today" is the calendar
    /// date of the injected `now`; the caller picks the timezone by choosing
    /// what clock to inject.
    pub fn reserve_send_slot(
        &self,
        now: DateTime<Utc>,
        daily_limit: u32,
        min_delay: Option<Duration>,
    ) -> Result<SlotDecision> {
        let stat = self.daily_stat(now.date_naive())?;
        let (sent, last_sent_at) = match &stat {
            Some(s) => (s.emails_sent, s.last_sent_at),
            None => (0, None),
        };

        if sent >= i64::from(daily_limit) {
            debug!(sent, daily_limit, "daily email limit reached");
            return Ok(SlotDecision::Deny(DenyReason::DailyLimitReached {
                sent,
                limit: daily_limit,
            }));
        }

        if let (Some(min_delay), Some(last)) = (min_delay, last_sent_at) {
            let elapsed = now - last;
            if elapsed < min_delay {
                return Ok(SlotDecision::Deny(DenyReason::TooSoon {
                    wait: min_delay - elapsed,
                }));
            }
        }

        Ok(SlotDecision::Allow)
    }

    /// Commits one send against today's quota. The delivery recorder calls
    /// this inside its transaction; callers driving an external transport
    /// directly may also call it standalone.
    pub fn record_send(&self, now: DateTime<Utc>) -> Result<()> {
        bump_daily_stat(&self.conn, now)?;
        Ok(())
    }
}

/// Lazily creates today's stat row and increments it. The counter never
/// decreases and there is exactly one row per date.
pub(crate) fn bump_daily_stat(conn: &Connection, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO daily_email_stats (day, emails_sent, last_sent_at)
         VALUES (?1, 1, ?2)
         ON CONFLICT(day) DO UPDATE SET
             emails_sent = emails_sent + 1,
             last_sent_at = excluded.last_sent_at",
        params![now.date_naive(), now],
    )?;
    Ok(())
}
