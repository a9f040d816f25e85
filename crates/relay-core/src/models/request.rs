use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::dispatch::DispatchDecision;

/// The immutable input of one pipeline run.
///
/// Built once from the caller's arguments plus the dispatch gate's verdict
/// on the free-form request text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRequest {
    task_id: String,
    zone: String,
    city: String,
    date: String,
    #[serde(rename = "request")]
    user_request_text: String,
    #[serde(rename = "email_requested")]
    derived_email_requested: bool,
    #[serde(rename = "recipients")]
    derived_recipients: Vec<String>,
}

impl PipelineRequest {
    pub fn new(
        task_id: impl Into<String>,
        zone: impl Into<String>,
        city: impl Into<String>,
        date: &str,
        user_request_text: impl Into<String>,
        decision: DispatchDecision,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            zone: zone.into(),
            city: city.into(),
            date: resolve_date(date),
            user_request_text: user_request_text.into(),
            derived_email_requested: decision.email_requested,
            derived_recipients: decision.recipients,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn user_request_text(&self) -> &str {
        &self.user_request_text
    }

    pub fn email_requested(&self) -> bool {
        self.derived_email_requested
    }

    pub fn recipients(&self) -> &[String] {
        &self.derived_recipients
    }

    /// The first message of the shared conversation, as a single JSON object.
    pub fn initial_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({
                "task_id": self.task_id,
                "zone": self.zone,
                "city": self.city,
                "date": self.date,
            })
            .to_string()
        })
    }
}

/// Replace relative date tokens with an explicit ISO date.
///
/// Workers downstream parse the date literally, so `today`, `today's` and
/// the `YYYY-MM-DD` placeholder become the current UTC date. Anything that
/// already parses as a date is normalized to `%Y-%m-%d`; other text is kept.
pub fn resolve_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if lower == "today" || lower == "today's" || lower == "yyyy-mm-dd" || lower.is_empty() {
        return Utc::now().format("%Y-%m-%d").to_string();
    }
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(email_requested: bool, recipients: &[&str]) -> DispatchDecision {
        DispatchDecision {
            email_requested,
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn initial_message_is_a_json_object() {
        let req = PipelineRequest::new(
            "remote-phase-1",
            "SE3",
            "Stockholm",
            "2025-10-01",
            "Send results to ops@example.com",
            decision(true, &["ops@example.com"]),
        );
        let msg: serde_json::Value = serde_json::from_str(&req.initial_message()).unwrap();
        assert_eq!(msg["task_id"], "remote-phase-1");
        assert_eq!(msg["zone"], "SE3");
        assert_eq!(msg["date"], "2025-10-01");
        assert_eq!(msg["email_requested"], true);
        assert_eq!(msg["recipients"][0], "ops@example.com");
    }

    #[test]
    fn relative_dates_become_iso() {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(resolve_date("today"), today);
        assert_eq!(resolve_date("Today's"), today);
        assert_eq!(resolve_date("YYYY-MM-DD"), today);
        assert_eq!(resolve_date(" 2025-10-01 "), "2025-10-01");
        assert_eq!(resolve_date("next week"), "next week");
    }
}
