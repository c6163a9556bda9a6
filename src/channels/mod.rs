//! Mailbox and terminal I/O.

pub mod cli;
pub mod email;
pub mod email_types;

pub use cli::TerminalReviewer;
pub use email::{ImapSmtpTransport, MailConfig};
pub use email_types::MailMessage;
