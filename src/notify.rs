use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::SyncError;
use crate::transfer::find_in_path;

/// Outgoing plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier {
    fn send(&self, message: &Message) -> Result<(), SyncError>;
}

/// Discards messages; used when mail is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn send(&self, message: &Message) -> Result<(), SyncError> {
        tracing::debug!(subject = %message.subject, "mail disabled, message dropped");
        Ok(())
    }
}

/// Hands messages to the local mail relay.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: Option<PathBuf>,
}

impl SendmailNotifier {
    pub fn new() -> Self {
        Self {
            program: find_in_path("sendmail").or_else(|| {
                let fallback = PathBuf::from("/usr/sbin/sendmail");
                fallback.exists().then_some(fallback)
            }),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

impl Default for SendmailNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for SendmailNotifier {
    fn send(&self, message: &Message) -> Result<(), SyncError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| SyncError::MissingTool("sendmail".to_string()))?;
        let mut child = Command::new(program)
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SyncError::Notify(format!("spawn {}: {err}", program.display())))?;
        // The child is reaped even when the write fails.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(render_message(message).as_bytes()),
            None => Ok(()),
        };
        let output = child
            .wait_with_output()
            .map_err(|err| SyncError::Notify(err.to_string()))?;
        written.map_err(|err| {
            SyncError::Notify(format!("write to {}: {err}", program.display()))
        })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SyncError::Notify(format!(
                "sendmail exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// RFC 822 style message as `sendmail -t` expects it.
pub fn render_message(message: &Message) -> String {
    format!(
        "To: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
        message.recipient,
        message.subject.replace(['\r', '\n'], " "),
        message.body
    )
}

/// Sends and only logs failures.
pub fn send_best_effort(notifier: &dyn Notifier, message: &Message) {
    match notifier.send(message) {
        Ok(()) => tracing::info!(recipient = %message.recipient, "report mailed"),
        Err(err) => tracing::warn!(recipient = %message.recipient, error = %err, "could not send report"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_precede_body() {
        let text = render_message(&Message {
            recipient: "curators@example.org".to_string(),
            subject: "Summary Stats\nrelease report".to_string(),
            body: "line one\nline two".to_string(),
        });
        assert!(text.starts_with("To: curators@example.org\nSubject: Summary Stats release report\n"));
        assert!(text.ends_with("\n\nline one\nline two\n"));
    }

    #[cfg(unix)]
    #[test]
    fn program_that_ignores_stdin_is_reaped_and_reported() {
        let Some(program) = find_in_path("true") else {
            return;
        };
        let notifier = SendmailNotifier::with_program(program);
        let message = Message {
            recipient: "a@b".to_string(),
            subject: "s".to_string(),
            body: "x".repeat(1 << 20),
        };
        assert!(matches!(
            notifier.send(&message),
            Err(SyncError::Notify(text)) if text.starts_with("write to ")
        ));
    }

    #[test]
    fn missing_program_is_reported() {
        let notifier = SendmailNotifier { program: None };
        let message = Message {
            recipient: "a@b".to_string(),
            subject: "s".to_string(),
            body: String::new(),
        };
        assert!(matches!(
            notifier.send(&message),
            Err(SyncError::MissingTool(tool)) if tool == "sendmail"
        ));
    }
}
