use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Deserialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use outreach::config::Config;
use outreach::contacts::normalize_contacts;
use outreach::mailer::{MailTransport, OutboxMailer};
use outreach::models::{Application, DeliveryStatus, EmailKind, JobStatus, Recruiter};
use outreach::ratelimit::{DenyReason, SlotDecision};
use outreach::templates::{render_first_contact, render_follow_up, EmailContext};
use outreach::tracker::{ApplicationUpsert, SendAttempt};
use outreach::{Database, TrackError};

#[derive(Parser)]
#[command(name = "outreach")]
#[command(about = "Recruiter outreach automation - track applications, send first contacts and follow-ups")]
struct Cli {
    /// Path to the tracking database (overrides OUTREACH_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Process exported sheet rows: first contacts, then due follow-ups
    Run {
        /// JSON file with an array of row objects
        rows: PathBuf,

        /// Show what would be sent without sending or recording
        #[arg(long)]
        dry_run: bool,

        /// Skip the follow-up pass
        #[arg(long)]
        skip_followups: bool,
    },

    /// Send due follow-up emails only
    Followups {
        /// Show what would be sent without sending or recording
        #[arg(long)]
        dry_run: bool,
    },

    /// List tracked applications
    List {
        /// Filter by status (draft, reached_out, applied, ...)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of rows to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show one application with its email history
    Show {
        /// Application ID
        id: i64,
    },

    /// Manually override an application's status
    Status {
        /// Application ID
        id: i64,

        /// New status (draft, reached_out, applied, interview_scheduled,
        /// in_progress, closed, rejected, accepted)
        status: String,

        /// Free-text notes to attach
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Show application and email statistics
    Stats {
        /// Emit machine-readable JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

/// One exported spreadsheet row. The sheet reader is an external
/// collaborator; this is just its normalized output shape.
#[derive(Debug, Deserialize)]
struct SheetRow {
    #[serde(default)]
    sheet: Option<String>,
    row: i64,
    #[serde(default)]
    company: String,
    #[serde(default)]
    position: String,
    /// Raw recruiter cell, e.g. "Jo - jo@acme.com, Sam - sam@acme.com"
    #[serde(default)]
    recruiters: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "job_posting_url")]
    posting_url: Option<String>,
    #[serde(default, alias = "salary")]
    expected_salary: Option<String>,
    #[serde(default, alias = "message")]
    custom_message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl SheetRow {
    fn row_key(&self) -> String {
        format!("{}:{}", self.sheet.as_deref().unwrap_or("Sheet1"), self.row)
    }

    /// Rows the sheet already marks as handled are not re-processed.
    fn already_processed(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| {
                matches!(
                    s.trim().to_lowercase().replace(' ', "_").as_str(),
                    "sent" | "reached_out" | "applied"
                )
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct RunSummary {
    sent: usize,
    failed: usize,
    skipped: usize,
    limit_reached: bool,
}

enum SendResult {
    Sent,
    Failed,
    Skipped,
    LimitReached,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("outreach=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("configuration error: {error}");
        }
        bail!("invalid configuration");
    }

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(Database::default_path);
    let mut db = Database::open_at(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db_path.display());
        }

        Commands::Run {
            rows,
            dry_run,
            skip_followups,
        } => {
            db.ensure_initialized()?;
            let raw = std::fs::read_to_string(&rows)
                .with_context(|| format!("failed to read rows file {}", rows.display()))?;
            let rows: Vec<SheetRow> = serde_json::from_str(&raw)
                .with_context(|| "rows file must be a JSON array of row objects")?;
            println!("Processing {} rows...", rows.len());

            let mailer = open_mailer(&config, dry_run)?;
            let mut summary = process_rows(&mut db, &config, mailer.as_deref(), &rows, dry_run)?;
            if !summary.limit_reached && !skip_followups {
                let followups =
                    process_followups(&mut db, &config, mailer.as_deref(), dry_run)?;
                summary.sent += followups.sent;
                summary.failed += followups.failed;
                summary.skipped += followups.skipped;
                summary.limit_reached = followups.limit_reached;
            }
            print_summary(&summary, dry_run);
        }

        Commands::Followups { dry_run } => {
            db.ensure_initialized()?;
            let mailer = open_mailer(&config, dry_run)?;
            let summary = process_followups(&mut db, &config, mailer.as_deref(), dry_run)?;
            print_summary(&summary, dry_run);
        }

        Commands::List { status, limit } => {
            db.ensure_initialized()?;
            let status = status
                .map(|s| s.parse::<JobStatus>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let apps = db.list_applications(status, limit)?;
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<25} {:<25} {:<12}",
                    "ID", "STATUS", "COMPANY", "POSITION", "CONTACTED"
                );
                println!("{}", "-".repeat(92));
                for app in apps {
                    let contacted = app
                        .first_contacted_at
                        .map(|t| t.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<6} {:<20} {:<25} {:<25} {:<12}",
                        app.id,
                        app.status.to_string(),
                        truncate(&app.company, 23),
                        truncate(&app.position, 23),
                        contacted
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_application(id)? {
                Some(app) => {
                    println!("Application #{} [{}]", app.id, app.row_key);
                    println!("Company:  {}", app.company);
                    println!("Position: {}", app.position);
                    println!("Status:   {}", app.status);
                    if let Some(location) = &app.location {
                        println!("Location: {location}");
                    }
                    if let Some(url) = &app.posting_url {
                        println!("URL:      {url}");
                    }
                    if let Some(salary) = &app.expected_salary {
                        println!("Salary:   {salary}");
                    }
                    if let Some(notes) = &app.notes {
                        println!("Notes:    {notes}");
                    }
                    println!("Created:  {}", app.created_at.format("%Y-%m-%d %H:%M:%S"));

                    let recruiters = db.linked_recruiters(app.id)?;
                    if !recruiters.is_empty() {
                        println!("\nRecruiters ({}):", recruiters.len());
                        for recruiter in &recruiters {
                            println!(
                                "  #{} {} <{}>",
                                recruiter.id,
                                recruiter.name.as_deref().unwrap_or("-"),
                                recruiter.email
                            );
                        }
                    }

                    let history = db.email_history(app.id)?;
                    if !history.is_empty() {
                        println!("\nEmails ({}):", history.len());
                        for record in &history {
                            let when = record
                                .sent_at
                                .unwrap_or(record.created_at)
                                .format("%Y-%m-%d %H:%M");
                            println!(
                                "  {} {:<13} #{} -> {} [{}]",
                                when,
                                record.kind.to_string(),
                                record.sequence,
                                record.recipient_email,
                                record.status
                            );
                        }
                    }
                }
                None => println!("Application #{id} not found."),
            }
        }

        Commands::Status { id, status, notes } => {
            db.ensure_initialized()?;
            let status: JobStatus = status.parse().map_err(|e| anyhow!("{e}"))?;
            db.update_job_status(Utc::now(), id, status, notes.as_deref())?;
            println!("Updated application #{id} status to {status}.");
        }

        Commands::Stats { json } => {
            db.ensure_initialized()?;
            let stats = db.get_statistics()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Total applications: {}", stats.total_applications);
                println!("Total emails sent:  {}", stats.total_emails_sent);
                println!("Follow-ups sent:    {}", stats.followups_sent);
                println!("\n{:<22} {:>6}", "STATUS", "COUNT");
                println!("{}", "-".repeat(29));
                for (status, count) in &stats.by_status {
                    println!("{:<22} {:>6}", status.to_string(), count);
                }
            }
        }
    }

    Ok(())
}

/// Dry runs never touch the transport, so none is constructed for them.
fn open_mailer(config: &Config, dry_run: bool) -> Result<Option<Box<dyn MailTransport>>> {
    if dry_run {
        return Ok(None);
    }
    let dir = config
        .outbox_dir
        .clone()
        .unwrap_or_else(|| match Database::default_path().parent() {
            Some(parent) => parent.join("outbox"),
            None => PathBuf::from("outbox"),
        });
    Ok(Some(Box::new(OutboxMailer::new(&dir)?)))
}

/// First-contact pass: upsert each row, then send to every still-eligible
/// recruiter in attachment order. Applications are processed in row order.
fn process_rows(
    db: &mut Database,
    config: &Config,
    mailer: Option<&dyn MailTransport>,
    rows: &[SheetRow],
    dry_run: bool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for row in rows {
        let contacts = normalize_contacts(&row.recruiters);
        if row.company.trim().is_empty() || row.position.trim().is_empty() || contacts.is_empty() {
            warn!(
                row_key = %row.row_key(),
                "skipping row with missing company, position or recruiters"
            );
            summary.skipped += 1;
            continue;
        }
        if row.already_processed() {
            summary.skipped += 1;
            continue;
        }

        let input = ApplicationUpsert {
            row_key: row.row_key(),
            sheet_name: row.sheet.clone(),
            company: row.company.clone(),
            position: row.position.clone(),
            location: row.location.clone(),
            posting_url: row.posting_url.clone(),
            expected_salary: row.expected_salary.clone(),
            custom_message: row.custom_message.clone(),
            contacts,
        };
        let app = db.upsert_application(Utc::now(), &input)?;

        for recruiter in db.first_contact_candidates(app.id)? {
            let (subject, body) = render_first_contact(&email_context(config, &app, &recruiter));
            match deliver(
                db,
                config,
                mailer,
                &app,
                &recruiter,
                EmailKind::FirstContact,
                0,
                &subject,
                &body,
                dry_run,
            )? {
                SendResult::Sent => summary.sent += 1,
                SendResult::Failed => summary.failed += 1,
                SendResult::Skipped => summary.skipped += 1,
                SendResult::LimitReached => {
                    summary.limit_reached = true;
                    return Ok(summary);
                }
            }
        }
    }

    Ok(summary)
}

/// Follow-up pass over every due (application, recruiter) pair, oldest last
/// send first.
fn process_followups(
    db: &mut Database,
    config: &Config,
    mailer: Option<&dyn MailTransport>,
    dry_run: bool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let candidates =
        db.followup_candidates(Utc::now(), config.followup_days, config.max_followups)?;
    if candidates.is_empty() {
        println!("No follow-ups due.");
        return Ok(summary);
    }
    println!("{} follow-ups due.", candidates.len());

    for candidate in candidates {
        let (subject, body) = render_follow_up(
            &email_context(config, &candidate.application, &candidate.recruiter),
            candidate.sequence,
        );
        match deliver(
            db,
            config,
            mailer,
            &candidate.application,
            &candidate.recruiter,
            EmailKind::FollowUp,
            candidate.sequence,
            &subject,
            &body,
            dry_run,
        )? {
            SendResult::Sent => summary.sent += 1,
            SendResult::Failed => summary.failed += 1,
            SendResult::Skipped => summary.skipped += 1,
            SendResult::LimitReached => {
                summary.limit_reached = true;
                return Ok(summary);
            }
        }
    }

    Ok(summary)
}

fn email_context<'a>(
    config: &'a Config,
    app: &'a Application,
    recruiter: &'a Recruiter,
) -> EmailContext<'a> {
    EmailContext {
        recruiter_name: recruiter.name.as_deref(),
        company: &app.company,
        position: &app.position,
        location: app.location.as_deref(),
        posting_url: app.posting_url.as_deref(),
        custom_message: app.custom_message.as_deref(),
        sender_name: &config.sender_name,
    }
}

/// Gate, send, record: reserves a slot (waiting out `TooSoon` denials with a
/// little jitter), hands the message to the transport, and records whatever
/// happened. Individual failures are recorded and the batch moves on.
#[allow(clippy::too_many_arguments)]
fn deliver(
    db: &mut Database,
    config: &Config,
    mailer: Option<&dyn MailTransport>,
    app: &Application,
    recruiter: &Recruiter,
    kind: EmailKind,
    sequence: i64,
    subject: &str,
    body: &str,
    dry_run: bool,
) -> Result<SendResult> {
    let label = match kind {
        EmailKind::FollowUp => format!("follow-up #{sequence}"),
        _ => "first contact".to_string(),
    };

    if dry_run {
        println!(
            "DRY RUN: would send {label} to {} <{}> for {} - {}",
            recruiter.name.as_deref().unwrap_or("N/A"),
            recruiter.email,
            app.company,
            app.position
        );
        return Ok(SendResult::Sent);
    }

    let min_delay = Duration::seconds(config.delay_min_secs as i64);
    loop {
        match db.reserve_send_slot(Utc::now(), config.daily_limit, Some(min_delay))? {
            SlotDecision::Allow => break,
            SlotDecision::Deny(DenyReason::DailyLimitReached { sent, limit }) => {
                warn!(sent, limit, "daily email limit reached, stopping run");
                return Ok(SendResult::LimitReached);
            }
            SlotDecision::Deny(DenyReason::TooSoon { wait }) => {
                let jitter = rand::thread_rng()
                    .gen_range(0..=config.delay_max_secs.saturating_sub(config.delay_min_secs));
                let pause = wait.to_std().unwrap_or_default()
                    + std::time::Duration::from_secs(jitter);
                std::thread::sleep(pause);
            }
        }
    }

    let mailer = mailer.ok_or_else(|| anyhow!("transport required outside dry runs"))?;
    let now = Utc::now();
    let (outcome, error) = match mailer.send(&recruiter.email, subject, body) {
        Ok(_delivery_id) => (DeliveryStatus::Sent, None),
        Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
    };

    let attempt = SendAttempt {
        application_id: app.id,
        recruiter_id: recruiter.id,
        kind,
        sequence,
        subject: subject.to_string(),
        recipient_email: recruiter.email.clone(),
        recipient_name: recruiter.name.clone(),
        outcome,
        error,
    };
    match db.record_send_outcome(now, &attempt) {
        Ok(_) => match outcome {
            DeliveryStatus::Sent => {
                println!(
                    "Sent {label} to {} <{}> - {}",
                    recruiter.name.as_deref().unwrap_or("N/A"),
                    recruiter.email,
                    app.company
                );
                Ok(SendResult::Sent)
            }
            _ => {
                println!("Failed to send {label} to {}", recruiter.email);
                Ok(SendResult::Failed)
            }
        },
        // Safe to skip: the record already exists, nothing was double-sent.
        Err(TrackError::DuplicateSend { .. }) => Ok(SendResult::Skipped),
        // A storage fault kills this attempt only; the batch continues.
        Err(e @ TrackError::Storage(_)) => {
            warn!(error = %e, recipient = %recruiter.email, "failed to record send outcome");
            Ok(SendResult::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!(
        "\nSummary: {} sent, {} failed, {} skipped",
        summary.sent, summary.failed, summary.skipped
    );
    if summary.limit_reached {
        println!("Stopped early: daily email limit reached.");
    }
    if dry_run {
        println!("(Dry run - no emails were actually sent)");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
