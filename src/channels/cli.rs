//! Terminal reviewer: line-oriented approve/edit/skip prompt.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::channels::email::describe_threading;
use crate::channels::email_types::preview;
use crate::pipeline::review::Reviewer;
use crate::pipeline::types::{DraftRecord, TriageRecord};

/// Characters of the original message shown above a draft.
const ORIGINAL_PREVIEW_CHARS: usize = 500;

/// Reads decisions line by line; drafts go to stdout, prompts to stderr.
pub struct TerminalReviewer<R> {
    lines: Lines<R>,
}

impl TerminalReviewer<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> TerminalReviewer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Reviewer for TerminalReviewer<R> {
    fn present(&mut self, record: &TriageRecord, draft: &DraftRecord) {
        let message = &record.message;
        let rule = "=".repeat(72);
        println!("\n{rule}");
        println!("From:     {}", message.from);
        println!("Subject:  {}", message.subject);
        println!("Received: {}", message.received_at.format("%Y-%m-%d %H:%M UTC"));
        println!(
            "Why:      [{}] {} ({})",
            record.classification.importance.label(),
            record.classification.rationale,
            record.classification.category
        );
        println!("\n{}", preview(message.body.trim(), ORIGINAL_PREVIEW_CHARS));
        println!("{}", "-".repeat(72));
        println!("To:       {}", draft.to);
        println!("Subject:  {}", draft.subject);
        println!("Thread:   {}", describe_threading(&draft.headers));
        println!("\n{}", draft.body);
        println!("{rule}");
    }

    async fn prompt(&mut self, prompt: &str) -> Option<String> {
        eprint!("{prompt}");
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Error reading stdin: {}", e);
                None
            }
        }
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prompt_reads_lines_until_eof() {
        let input: &[u8] = b"e\nmake it shorter\ny\n";
        let mut reviewer = TerminalReviewer::new(input);

        assert_eq!(reviewer.prompt("> ").await.as_deref(), Some("e"));
        assert_eq!(reviewer.prompt("> ").await.as_deref(), Some("make it shorter"));
        assert_eq!(reviewer.prompt("> ").await.as_deref(), Some("y"));
        assert_eq!(reviewer.prompt("> ").await, None);
    }
}
