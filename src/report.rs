//! Plain-text needs-response report.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::channels::email_types::preview;
use crate::error::PersistenceError;
use crate::pipeline::types::TriageRecord;

const BODY_PREVIEW_CHARS: usize = 300;

/// Order for display: time-sensitive first, then importance, then newest.
pub fn sort_for_report(records: &mut [TriageRecord]) {
    records.sort_by(|a, b| {
        b.classification
            .time_sensitive
            .cmp(&a.classification.time_sensitive)
            .then(a.classification.importance.cmp(&b.classification.importance))
            .then(b.message.received_at.cmp(&a.message.received_at))
    });
}

/// Render the report text.
pub fn render(records: &[TriageRecord], generated_at: DateTime<Utc>) -> String {
    let mut sorted = records.to_vec();
    sort_for_report(&mut sorted);

    let mut out = String::new();
    let _ = writeln!(out, "EMAILS NEEDING RESPONSE");
    let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Total: {}", sorted.len());
    let _ = writeln!(out, "{}", "=".repeat(72));

    if sorted.is_empty() {
        let _ = writeln!(out, "\nNothing needs a response.");
        return out;
    }

    for (i, record) in sorted.iter().enumerate() {
        let c = &record.classification;
        let m = &record.message;
        let _ = writeln!(out, "\n{}. {}", i + 1, m.subject);
        let _ = writeln!(out, "   From:       {}", m.from);
        let _ = writeln!(out, "   Received:   {}", m.received_at.format("%Y-%m-%d %H:%M UTC"));
        let _ = writeln!(
            out,
            "   Importance: {}{}",
            c.importance.label(),
            if c.time_sensitive { " (time-sensitive)" } else { "" }
        );
        if !c.topics.is_empty() {
            let _ = writeln!(out, "   Topics:     {}", c.topics.join(", "));
        }
        let _ = writeln!(out, "   Category:   {}", c.category);
        let _ = writeln!(out, "   Reason:     {}", c.rationale);

        let body = preview(m.body.trim(), BODY_PREVIEW_CHARS);
        let truncated = m.body.trim().chars().count() > BODY_PREVIEW_CHARS;
        let _ = writeln!(
            out,
            "   Preview:    {}{}",
            body.replace('\n', " "),
            if truncated { "..." } else { "" }
        );
        let _ = writeln!(out, "   {}", "-".repeat(40));
    }

    out
}

/// Render and write the report to `path`.
pub async fn write_report(path: &Path, records: &[TriageRecord]) -> Result<String, PersistenceError> {
    let text = render(records, Utc::now());
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    fs::write(path, text.as_bytes()).await.map_err(write_err)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::channels::email_types::MailMessage;
    use crate::pipeline::types::{Classification, Importance};
    use crate::threading;

    fn record(subject: &str, importance: Importance, time_sensitive: bool, body: &str) -> TriageRecord {
        let message = MailMessage {
            message_id: Some(format!("{subject}@x")),
            in_reply_to: None,
            references: vec![],
            from: "ann@x.org".into(),
            to: vec![],
            subject: subject.into(),
            body: body.into(),
            received_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
        };
        TriageRecord {
            key: threading::resolve(&message),
            message,
            classification: Classification {
                important: true,
                importance,
                category: "request".into(),
                rationale: "needs an answer".into(),
                time_sensitive,
                topics: vec!["budget".into()],
            },
            triaged_at: Utc::now(),
        }
    }

    #[test]
    fn time_sensitive_sorts_before_importance() {
        let mut records = vec![
            record("low", Importance::Low, false, "x"),
            record("high", Importance::High, false, "x"),
            record("urgent-medium", Importance::Medium, true, "x"),
        ];
        sort_for_report(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.message.subject.as_str()).collect();
        assert_eq!(order, vec!["urgent-medium", "high", "low"]);
    }

    #[test]
    fn newer_message_first_within_same_rank() {
        let older = record("older", Importance::High, false, "x");
        let mut newer = record("newer", Importance::High, false, "x");
        newer.message.received_at += Duration::hours(1);
        let mut records = vec![older, newer];
        sort_for_report(&mut records);
        assert_eq!(records[0].message.subject, "newer");
    }

    #[test]
    fn render_truncates_preview() {
        let long = "a".repeat(400);
        let text = render(&[record("Budget", Importance::High, true, &long)], Utc::now());
        assert!(text.contains("Total: 1"));
        assert!(text.contains("high (time-sensitive)"));
        assert!(text.contains("Topics:     budget"));
        assert!(text.contains(&format!("{}...", "a".repeat(300))));
        assert!(!text.contains(&"a".repeat(301)));
    }

    #[test]
    fn render_empty_set() {
        assert!(render(&[], Utc::now()).contains("Nothing needs a response."));
    }

    #[tokio::test]
    async fn write_report_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.txt");
        let text = write_report(&path, &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }
}
