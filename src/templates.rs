//! Plain-text rendering for outreach emails.
//!
//! Deliberately thin: the engine only needs a `render(kind, vars) ->
//! (subject, body)` capability, and a richer templating layer is a swappable
//! collaborator.

use std::fmt::Write;

/// Variables available to both email kinds.
#[derive(Debug, Clone, Default)]
pub struct EmailContext<'a> {
    pub recruiter_name: Option<&'a str>,
    pub company: &'a str,
    pub position: &'a str,
    pub location: Option<&'a str>,
    pub posting_url: Option<&'a str>,
    pub custom_message: Option<&'a str>,
    pub sender_name: &'a str,
}

impl EmailContext<'_> {
    fn greeting(&self) -> String {
        format!("Dear {},", self.recruiter_name.unwrap_or("Hiring Manager"))
    }

    fn position_line(&self) -> String {
        match self.location {
            Some(loc) => format!("{} position at {} ({loc})", self.position, self.company),
            None => format!("{} position at {}", self.position, self.company),
        }
    }
}

pub fn render_first_contact(ctx: &EmailContext) -> (String, String) {
    let subject = format!(
        "Application for {} Position at {}",
        ctx.position, ctx.company
    );

    let mut body = String::new();
    let _ = writeln!(body, "{}", ctx.greeting());
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "I hope this email finds you well. I am writing to express my interest in the {}.",
        ctx.position_line()
    );
    if let Some(url) = ctx.posting_url {
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "I came across this opportunity at {url} and I am excited about the possibility of contributing to your team."
        );
    }
    let _ = writeln!(body);
    match ctx.custom_message {
        Some(message) => {
            let _ = writeln!(body, "{message}");
        }
        None => {
            let _ = writeln!(
                body,
                "With my background and experience, I believe I would be a valuable addition to {}. I have attached my resume for your review, and I would welcome the opportunity to discuss how my skills and experience align with your needs.",
                ctx.company
            );
        }
    }
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "Thank you for considering my application. I look forward to hearing from you."
    );
    let _ = writeln!(body);
    let _ = writeln!(body, "Best regards,");
    let _ = write!(body, "{}", ctx.sender_name);

    (subject, body)
}

pub fn render_follow_up(ctx: &EmailContext, _sequence: i64) -> (String, String) {
    let subject = format!(
        "Follow-up: Application for {} Position at {}",
        ctx.position, ctx.company
    );

    let mut body = String::new();
    let _ = writeln!(body, "{}", ctx.greeting());
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "I wanted to follow up on my previous email regarding the {}.",
        ctx.position_line()
    );
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "I remain very interested in this opportunity and would appreciate any updates on the status of my application. I am happy to provide any additional information that might be helpful in your evaluation process."
    );
    let _ = writeln!(body);
    let _ = writeln!(body, "Thank you for your time and consideration.");
    let _ = writeln!(body);
    let _ = writeln!(body, "Best regards,");
    let _ = write!(body, "{}", ctx.sender_name);

    (subject, body)
}
