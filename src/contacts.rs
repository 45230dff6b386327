//! Parsing of raw recruiter cells into structured contacts.
//!
//! A single cell may hold several contacts: "Jo - jo@acme.com, Sam -
//! sam@acme.com", a bare address, or a name with the address somewhere after
//! it. Parsing is pure; nothing here touches the database.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::models::Contact;

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

static NAME_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(.+?)\s*-\s*({EMAIL_PATTERN})$")).expect("valid regex")
});

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("valid regex"));

static EMAIL_EXACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{EMAIL_PATTERN}$")).expect("valid regex"));

/// Permissive syntactic check, mirroring the address pattern the normalizer
/// extracts with.
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && EMAIL_EXACT_RE.is_match(email)
}

/// Parses a free-text cell into contacts, dropping duplicate addresses
/// (case-insensitive, first occurrence wins) and segments with no usable
/// address. Empty input yields an empty list.
pub fn normalize_contacts(raw: &str) -> Vec<Contact> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let mut contacts = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let contact = if let Some(caps) = NAME_EMAIL_RE.captures(segment) {
            // "Name - email@domain.com"
            let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            Contact {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: caps[2].to_string(),
            }
        } else if let Some(m) = EMAIL_RE.find(segment) {
            // Address embedded somewhere; anything before it is the name.
            let name = segment[..m.start()].trim_end_matches('-').trim();
            Contact {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: m.as_str().to_string(),
            }
        } else {
            warn!(segment, "skipping recruiter segment with no usable email");
            continue;
        };

        if seen.insert(contact.email.to_lowercase()) {
            contacts.push(contact);
        }
    }

    contacts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: Option<&str>, email: &str) -> Contact {
        Contact {
            name: name.map(str::to_string),
            email: email.to_string(),
        }
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(normalize_contacts("").is_empty());
        assert!(normalize_contacts("   ").is_empty());
    }

    #[test]
    fn parses_name_dash_email_pairs() {
        let got = normalize_contacts("Jo Smith - jo@acme.com, Sam - sam@acme.com");
        assert_eq!(
            got,
            vec![
                contact(Some("Jo Smith"), "jo@acme.com"),
                contact(Some("Sam"), "sam@acme.com"),
            ]
        );
    }

    #[test]
    fn parses_bare_email() {
        let got = normalize_contacts("jo@acme.com");
        assert_eq!(got, vec![contact(None, "jo@acme.com")]);
    }

    #[test]
    fn extracts_name_without_dash() {
        let got = normalize_contacts("Jo Smith jo@acme.com");
        assert_eq!(got, vec![contact(Some("Jo Smith"), "jo@acme.com")]);
    }

    #[test]
    fn dedups_by_email_case_insensitively_keeping_first() {
        let got = normalize_contacts(
            "Alice - alice@x.com, Alice - ALICE@X.COM, Bob - bob@y.com",
        );
        assert_eq!(
            got,
            vec![
                contact(Some("Alice"), "alice@x.com"),
                contact(Some("Bob"), "bob@y.com"),
            ]
        );
    }

    #[test]
    fn drops_segments_without_an_address() {
        let got = normalize_contacts("Just A Name, sam@acme.com");
        assert_eq!(got, vec![contact(None, "sam@acme.com")]);
    }

    #[test]
    fn drops_malformed_addresses() {
        assert!(normalize_contacts("Jo - jo@nowhere").is_empty());
    }

    #[test]
    fn validate_email_accepts_common_forms() {
        assert!(validate_email("a.b+tag@sub.example.co"));
        assert!(!validate_email(""));
        assert!(!validate_email("no-at-sign.example.com"));
        assert!(!validate_email("x@tld"));
    }
}
