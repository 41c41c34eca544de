//! Run summaries rendered for notification mails.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::{
    collab::{Attachment, Mail},
    config::MailConfig,
    events::RunSummary,
    model::RunStatus,
    utils,
};

const ATTACHMENT_NAME: &str = "report.html";

/// HTML block with finish time, duration, counters and messages.
pub fn info_text(
    summary: &RunSummary,
    elapsed: Duration,
    finished: DateTime<Local>,
) -> String {
    let mut text = format!(
        "Finished: <i>{}</i><br />\nTime: <i>{:.3} sec</i><br />\n<br />\n<b>New:</b> {}<br />\n<b>Failed:</b> {}<br />\n<b>Existing:</b> {}<br />\n<b>Skipped:</b> {}<br />\n",
        finished.format("%Y-%m-%d %H:%M:%S"),
        elapsed.as_secs_f64(),
        summary.succeeded,
        summary.failed,
        summary.existing,
        summary.skipped,
    );
    if !summary.errors.is_empty() {
        text.push_str(&format!("<h3>{} Errors</h3>\n{}\n", summary.errors.len(), summary.errors.join("<br />")));
    }
    if !summary.warnings.is_empty() {
        text.push_str(&format!("<h3>{} Warnings</h3>\n{}\n", summary.warnings.len(), summary.warnings.join("<br />")));
    }
    text
}

pub fn mail_subject(
    scraper_name: &str,
    status: RunStatus,
) -> String {
    let subject = match status {
        RunStatus::Success => format!("'{}' process finished", scraper_name),
        RunStatus::Aborted => format!("'{}' process aborted", scraper_name),
        RunStatus::Fail => format!("'{}' process failed", scraper_name),
        RunStatus::Running => format!("'{}' process '{}'", scraper_name, status),
    };
    subject.replace('.', "_")
}

/// Builds the notification for a finished run. Bodies longer than
/// `truncate_at` are cut and the full text travels as an attachment.
pub fn build_mail(
    summary: &RunSummary,
    elapsed: Duration,
    config: &MailConfig,
) -> Mail {
    let text = format!("I have finished processing scraper: <i>{}</i><br />\n<br />\n{}", summary.scraper_name, info_text(summary, elapsed, Local::now()));
    let long = text.chars().count() > config.truncate_at;
    Mail {
        subject: mail_subject(&summary.scraper_name, summary.status),
        html_body: if long { utils::truncate(&text, config.truncate_at) } else { text.clone() },
        recipient: config.recipient.clone(),
        attachment: long.then(|| Attachment {
            name: ATTACHMENT_NAME.to_string(),
            content: text,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            scraper_name: "seek.com.au".into(),
            status: RunStatus::Fail,
            succeeded: 3,
            failed: 1,
            errors: vec!["bad selector at (http://x)".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_subjects() {
        assert_eq!(mail_subject("seek.com.au", RunStatus::Success), "'seek_com_au' process finished");
        assert_eq!(mail_subject("jobs", RunStatus::Aborted), "'jobs' process aborted");
        assert_eq!(mail_subject("jobs", RunStatus::Fail), "'jobs' process failed");
    }

    #[test]
    fn test_info_text() {
        let text = info_text(&summary(), Duration::from_millis(1500), Local::now());
        assert!(text.contains("Time: <i>1.500 sec</i>"));
        assert!(text.contains("<b>New:</b> 3"));
        assert!(text.contains("<h3>1 Errors</h3>"));
        assert!(!text.contains("Warnings"));
    }

    #[test]
    fn test_long_body_moves_to_attachment() {
        let mut config = MailConfig {
            recipient: "ops@example.com".into(),
            ..Default::default()
        };
        let mail = build_mail(&summary(), Duration::from_secs(1), &config);
        assert!(mail.attachment.is_none());
        assert_eq!(mail.subject, "'seek_com_au' process failed");

        config.truncate_at = 40;
        let mail = build_mail(&summary(), Duration::from_secs(1), &config);
        assert_eq!(mail.html_body.chars().count(), 43);
        assert!(mail.html_body.ends_with("..."));
        let attachment = mail.attachment.unwrap();
        assert_eq!(attachment.name, "report.html");
        assert!(attachment.content.contains("bad selector"));
    }
}
