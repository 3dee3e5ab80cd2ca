//! Message-passing confirmation of proposed mutations.
//!
//! The committing thread sends a [`PendingConfirmation`] to whoever holds the
//! receiver and blocks on the reply. Nothing calls back into the caller.

use scribe_core::ApprovalMode;
use scribe_vault::{MutationIntent, MutationKind};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

const PREVIEW_MAX_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

/// What a responder is shown before deciding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentSummary {
    pub path: String,
    pub kind: MutationKind,
    pub expected_sha256: Option<String>,
    pub before_bytes: Option<usize>,
    pub after_bytes: Option<usize>,
    pub preview: Vec<String>,
}

impl IntentSummary {
    pub fn describe(display_path: &str, intent: &MutationIntent, before: Option<&[u8]>) -> Self {
        let after = intent.proposed_content();
        let before_text = before.map(String::from_utf8_lossy).unwrap_or_default();
        let after_text = after.map(String::from_utf8_lossy).unwrap_or_default();
        Self {
            path: display_path.to_string(),
            kind: intent.kind(),
            expected_sha256: intent.expected_prior().map(ToString::to_string),
            before_bytes: before.map(<[u8]>::len),
            after_bytes: after.map(<[u8]>::len),
            preview: line_preview(&before_text, &after_text, PREVIEW_MAX_LINES),
        }
    }

    pub fn headline(&self) -> String {
        let sizes = match (self.before_bytes, self.after_bytes) {
            (Some(before), Some(after)) => format!("{before} -> {after} bytes"),
            (None, Some(after)) => format!("new, {after} bytes"),
            (Some(before), None) => format!("{before} bytes removed"),
            (None, None) => "empty".to_string(),
        };
        format!("{} {} ({sizes})", self.kind, self.path)
    }
}

/// A request waiting on a decision. Dropping it unanswered denies it.
pub struct PendingConfirmation {
    pub token: Uuid,
    pub summary: IntentSummary,
    reply: Sender<Decision>,
}

impl PendingConfirmation {
    pub fn respond(self, decision: Decision) {
        let _ = self.reply.send(decision);
    }

    pub fn approve(self) {
        self.respond(Decision::Approved);
    }

    pub fn deny(self) {
        self.respond(Decision::Denied);
    }
}

pub struct ConfirmationBroker {
    mode: ApprovalMode,
    requests: Option<Sender<PendingConfirmation>>,
}

impl ConfirmationBroker {
    /// Broker plus the receiving end a responder reads requests from.
    pub fn channel(mode: ApprovalMode) -> (Self, Receiver<PendingConfirmation>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                mode,
                requests: Some(tx),
            },
            rx,
        )
    }

    /// Broker with no responder. In `Ask` mode every request is denied.
    pub fn unattended(mode: ApprovalMode) -> Self {
        Self {
            mode,
            requests: None,
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Blocks until the mutation is approved or denied.
    pub fn confirm(&self, summary: IntentSummary) -> Decision {
        match self.mode {
            ApprovalMode::Always => Decision::Approved,
            ApprovalMode::Never => Decision::Denied,
            ApprovalMode::Ask => {
                let Some(requests) = &self.requests else {
                    return Decision::Denied;
                };
                let (reply, response) = mpsc::channel();
                let pending = PendingConfirmation {
                    token: Uuid::now_v7(),
                    summary,
                    reply,
                };
                if requests.send(pending).is_err() {
                    return Decision::Denied;
                }
                response.recv().unwrap_or(Decision::Denied)
            }
        }
    }
}

/// Answers every request on `requests` with `decide` from a background thread.
pub fn spawn_responder<F>(requests: Receiver<PendingConfirmation>, mut decide: F) -> JoinHandle<()>
where
    F: FnMut(&PendingConfirmation) -> Decision + Send + 'static,
{
    thread::spawn(move || {
        for pending in requests {
            let decision = decide(&pending);
            pending.respond(decision);
        }
    })
}

/// Changed region of two texts, as `-`/`+` lines after trimming the common
/// leading and trailing lines.
pub fn line_preview(before: &str, after: &str, max_lines: usize) -> Vec<String> {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let removed = &old[prefix..old.len() - suffix];
    let added = &new[prefix..new.len() - suffix];
    if removed.is_empty() && added.is_empty() {
        return Vec::new();
    }

    let mut out = vec![format!("@@ line {} @@", prefix + 1)];
    out.extend(removed.iter().map(|line| format!("-{line}")));
    out.extend(added.iter().map(|line| format!("+{line}")));
    if out.len() > max_lines {
        let hidden = out.len() - max_lines;
        out.truncate(max_lines);
        out.push(format!("... {hidden} more line(s)"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_vault::Fingerprint;
    use uuid::Uuid;

    fn summary() -> IntentSummary {
        let intent = MutationIntent::new(
            "/w/a.txt",
            scribe_vault::MutationOp::Update {
                expected: Fingerprint::of(b"a\nb\nc\n"),
                content: b"a\nB\nc\n".to_vec(),
            },
            Uuid::now_v7(),
        );
        IntentSummary::describe("a.txt", &intent, Some(b"a\nb\nc\n"))
    }

    #[test]
    fn summary_carries_sizes_fingerprint_and_preview() {
        let summary = summary();
        assert_eq!(summary.kind, MutationKind::Update);
        assert_eq!(
            summary.expected_sha256.as_deref(),
            Some(Fingerprint::of(b"a\nb\nc\n").as_str())
        );
        assert_eq!(summary.preview, vec!["@@ line 2 @@", "-b", "+B"]);
        assert_eq!(summary.headline(), "update a.txt (6 -> 6 bytes)");
    }

    #[test]
    fn preview_truncates_long_changes() {
        let after = (0..100).map(|i| format!("l{i}\n")).collect::<String>();
        let preview = line_preview("", &after, 10);
        assert_eq!(preview.len(), 11);
        assert_eq!(preview[10], "... 91 more line(s)");
        assert!(line_preview("same\n", "same\n", 10).is_empty());
    }

    #[test]
    fn modes_short_circuit_without_a_responder() {
        assert_eq!(
            ConfirmationBroker::unattended(ApprovalMode::Always).confirm(summary()),
            Decision::Approved
        );
        assert_eq!(
            ConfirmationBroker::unattended(ApprovalMode::Never).confirm(summary()),
            Decision::Denied
        );
        assert_eq!(
            ConfirmationBroker::unattended(ApprovalMode::Ask).confirm(summary()),
            Decision::Denied
        );
    }

    #[test]
    fn ask_mode_routes_to_responder() {
        let (broker, requests) = ConfirmationBroker::channel(ApprovalMode::Ask);
        let responder = spawn_responder(requests, |pending| {
            if pending.summary.path == "a.txt" {
                Decision::Approved
            } else {
                Decision::Denied
            }
        });
        assert_eq!(broker.confirm(summary()), Decision::Approved);
        let mut other = summary();
        other.path = "b.txt".to_string();
        assert_eq!(broker.confirm(other), Decision::Denied);
        drop(broker);
        responder.join().expect("responder exits when broker drops");
    }

    #[test]
    fn unanswered_request_is_denied() {
        let (broker, requests) = ConfirmationBroker::channel(ApprovalMode::Ask);
        let dropper = thread::spawn(move || {
            let pending = requests.recv().expect("request");
            drop(pending);
        });
        assert_eq!(broker.confirm(summary()), Decision::Denied);
        dropper.join().expect("join");
    }
}
