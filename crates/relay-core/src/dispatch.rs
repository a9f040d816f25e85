//! Dispatch gate: decides from the free-form request whether the run should
//! end in an email, and to whom.

use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref EMAIL_ADDRESS: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex");
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDecision {
    pub email_requested: bool,
    pub recipients: Vec<String>,
}

/// Evaluate a user request.
///
/// Recipients are the email addresses in order of first appearance with
/// duplicates dropped. Email is requested when any address was found or the
/// text mentions "email" or "send" (case-insensitive).
pub fn evaluate(user_request_text: &str) -> DispatchDecision {
    let mut recipients: Vec<String> = Vec::new();
    for m in EMAIL_ADDRESS.find_iter(user_request_text) {
        let addr = m.as_str().to_string();
        if !recipients.contains(&addr) {
            recipients.push(addr);
        }
    }

    let lower = user_request_text.to_lowercase();
    let email_requested =
        !recipients.is_empty() || lower.contains("email") || lower.contains("send");

    DispatchDecision {
        email_requested,
        recipients,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_implies_email() {
        let d = evaluate("Send results to x@y.com");
        assert!(d.email_requested);
        assert_eq!(d.recipients, vec!["x@y.com".to_string()]);
    }

    #[test]
    fn plain_request_has_no_email() {
        let d = evaluate("Compute baseline only");
        assert!(!d.email_requested);
        assert!(d.recipients.is_empty());
    }

    #[test]
    fn keyword_without_address() {
        let d = evaluate("Please EMAIL me the summary");
        assert!(d.email_requested);
        assert!(d.recipients.is_empty());
    }

    #[test]
    fn recipients_keep_first_appearance_order() {
        let d = evaluate("cc b@corp.io, a@corp.io and b@corp.io again");
        assert_eq!(
            d.recipients,
            vec!["b@corp.io".to_string(), "a@corp.io".to_string()]
        );
    }
}
