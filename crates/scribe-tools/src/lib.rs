mod confirm;
mod edit;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use scribe_core::{
    AppConfig, ApprovedToolCall, EventEnvelope, EventKind, ToolCall, ToolHost, ToolName,
    ToolProposal, ToolResult,
};
use scribe_errors::errors;
use scribe_observe::Observer;
use scribe_policy::PolicyEngine;
use scribe_store::Store;
use scribe_vault::{
    CancelToken, CommitOutcome, Fingerprint, MutationIntent, MutationKind, MutationOp,
    RejectReason, RetentionPolicy, ServiceConfig, VersionRecord, VersionedFileService,
};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub use confirm::{
    ConfirmationBroker, Decision, IntentSummary, PendingConfirmation, line_preview,
    spawn_responder,
};
pub use edit::EditOp;

const READ_MAX_BYTES_DEFAULT: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Committed,
    Rejected,
    Denied,
    Cancelled,
}

/// Outcome of one file tool mutation, as reported to callers and the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub path: String,
    pub kind: MutationKind,
    pub status: MutationStatus,
    pub version_id: Option<Uuid>,
    pub sha256: Option<String>,
    pub archived_version_id: Option<Uuid>,
    pub reason: Option<RejectReason>,
    pub restored_from: Option<Uuid>,
}

impl MutationReport {
    fn new(path: &str, kind: MutationKind, status: MutationStatus) -> Self {
        Self {
            path: path.to_string(),
            kind,
            status,
            version_id: None,
            sha256: None,
            archived_version_id: None,
            reason: None,
            restored_from: None,
        }
    }

    fn rejected(path: &str, kind: MutationKind, reason: RejectReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(path, kind, MutationStatus::Rejected)
        }
    }

    pub fn committed(&self) -> bool {
        self.status == MutationStatus::Committed
    }
}

/// Workspace file tools backed by the versioned mutation service.
pub struct FileToolHost {
    workspace: PathBuf,
    policy: PolicyEngine,
    vault: VersionedFileService,
    broker: ConfirmationBroker,
    store: Store,
    observer: Arc<Observer>,
    session_id: Uuid,
    cancel: CancelToken,
}

impl FileToolHost {
    pub fn new(
        workspace: &Path,
        cfg: &AppConfig,
        broker: ConfirmationBroker,
        observer: Arc<Observer>,
    ) -> Result<Self> {
        let policy = PolicyEngine::new(cfg.policy.clone()).context("load path policy")?;
        let vault = VersionedFileService::new(
            ServiceConfig::for_workspace(workspace, &cfg.archive),
            observer.clone(),
        );
        Ok(Self {
            workspace: workspace.to_path_buf(),
            policy,
            vault,
            broker,
            store: Store::new(workspace)?,
            observer,
            session_id: Uuid::now_v7(),
            cancel: CancelToken::new(),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn vault(&self) -> &VersionedFileService {
        &self.vault
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Token shared with every commit this host makes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Resolves a user path to `(workspace-relative display path, absolute path)`.
    pub fn resolve(&self, raw: &str) -> Result<(String, PathBuf)> {
        let full = self.policy.resolve_in_workspace(&self.workspace, raw)?;
        let rel = full
            .strip_prefix(&self.workspace)
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| raw.to_string());
        Ok((rel, full))
    }

    pub fn read(
        &self,
        raw: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
        max_bytes: usize,
    ) -> Result<serde_json::Value> {
        let (rel, full) = self.resolve(raw)?;
        let (observation, bytes) = self.vault.observe_content(&full)?;
        let Some(bytes) = bytes else {
            return Err(anyhow!("file not found: {rel}"));
        };
        let sha = observation.fingerprint.map(|fp| fp.to_string());
        let mime = guess_mime(&full);
        if is_binary(&bytes) {
            return Ok(json!({
                "path": rel,
                "mime": mime,
                "binary": true,
                "size_bytes": bytes.len(),
                "sha256": sha,
                "version_id": observation.version_id,
            }));
        }
        let truncated = bytes.len() > max_bytes;
        let visible = &bytes[..bytes.len().min(max_bytes)];
        let content = String::from_utf8_lossy(visible).to_string();
        let lines = collect_lines(&content, start_line, end_line);
        Ok(json!({
            "path": rel,
            "mime": mime,
            "binary": false,
            "size_bytes": bytes.len(),
            "truncated": truncated,
            "sha256": sha,
            "version_id": observation.version_id,
            "content": content,
            "lines": lines,
        }))
    }

    /// Creates the file when absent, otherwise replaces it. With `expected`,
    /// the write only lands if the file still has that fingerprint.
    pub fn write(
        &self,
        raw: &str,
        content: Vec<u8>,
        expected: Option<Fingerprint>,
    ) -> Result<MutationReport> {
        let (rel, full) = self.resolve(raw)?;
        let (observation, before) = self.vault.observe_content(&full)?;
        let intent = match expected {
            Some(expected) => {
                let prior = if observation.fingerprint.as_ref() == Some(&expected) {
                    observation.version_id
                } else {
                    Uuid::now_v7()
                };
                MutationIntent::new(full, MutationOp::Update { expected, content }, prior)
            }
            None => observation.into_write(content),
        };
        self.submit(&rel, intent, before.as_deref(), None)
    }

    /// Applies `ops` to the current content. Returns the report and the
    /// number of replacements made.
    pub fn edit(&self, raw: &str, ops: &[EditOp]) -> Result<(MutationReport, usize)> {
        let (rel, full) = self.resolve(raw)?;
        let (observation, before) = self.vault.observe_content(&full)?;
        let Some(before) = before else {
            return Err(anyhow!("file not found: {rel}"));
        };
        let original = String::from_utf8(before.clone())
            .map_err(|_| anyhow!("file is not valid UTF-8: {rel}"))?;
        let mut after = original.clone();
        let mut replacements = 0usize;
        for op in ops {
            replacements += op.apply(&mut after)?;
        }
        if after == original {
            let report = MutationReport::rejected(&rel, MutationKind::Update, RejectReason::NoChange);
            self.journal_report(&report);
            return Ok((report, replacements));
        }
        let intent = observation
            .into_update(after)
            .ok_or_else(|| anyhow!("file not found: {rel}"))?;
        Ok((self.submit(&rel, intent, Some(&before), None)?, replacements))
    }

    pub fn delete(&self, raw: &str, expected: Option<Fingerprint>) -> Result<MutationReport> {
        let (rel, full) = self.resolve(raw)?;
        let (observation, before) = self.vault.observe_content(&full)?;
        let intent = match expected {
            Some(expected) => {
                let prior = if observation.fingerprint.as_ref() == Some(&expected) {
                    observation.version_id
                } else {
                    Uuid::now_v7()
                };
                MutationIntent::new(full, MutationOp::Delete { expected }, prior)
            }
            None => match observation.into_delete() {
                Some(intent) => intent,
                None => {
                    let report =
                        MutationReport::rejected(&rel, MutationKind::Delete, RejectReason::NotFound);
                    self.journal_report(&report);
                    return Ok(report);
                }
            },
        };
        self.submit(&rel, intent, before.as_deref(), None)
    }

    /// Puts an archived version back, superseding (and archiving) whatever
    /// is on disk now.
    pub fn restore(&self, raw: &str, version_id: Uuid) -> Result<MutationReport> {
        let (rel, full) = self.resolve(raw)?;
        let Some(content) = self.vault.get_version(&full, version_id)? else {
            return Err(errors::version_not_found(&rel, &version_id.to_string()).into_error());
        };
        // One read feeds both the preview and the expected fingerprint.
        let (observation, before) = self.vault.observe_content(&full)?;
        let intent = observation.into_write(content);
        self.submit(&rel, intent, before.as_deref(), Some(version_id))
    }

    pub fn versions(&self, raw: &str) -> Result<Vec<VersionRecord>> {
        let (_, full) = self.resolve(raw)?;
        Ok(self.vault.version_records(&full)?)
    }

    pub fn version_content(&self, raw: &str, version_id: Uuid) -> Result<Vec<u8>> {
        let (rel, full) = self.resolve(raw)?;
        self.vault
            .get_version(&full, version_id)?
            .ok_or_else(|| errors::version_not_found(&rel, &version_id.to_string()).into_error())
    }

    pub fn prune(&self, raw: &str, policy: &dyn RetentionPolicy) -> Result<Vec<Uuid>> {
        let (rel, full) = self.resolve(raw)?;
        let removed = self.vault.prune_versions(&full, policy)?;
        if !removed.is_empty() {
            self.emit(EventKind::VersionsPrunedV1 {
                path: rel,
                removed: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Paths under this workspace that have archived history.
    pub fn tracked_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .vault
            .archive()
            .tracked_paths()?
            .into_iter()
            .filter_map(|path| {
                path.strip_prefix(&self.workspace)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect())
    }

    fn submit(
        &self,
        rel: &str,
        intent: MutationIntent,
        before: Option<&[u8]>,
        restored_from: Option<Uuid>,
    ) -> Result<MutationReport> {
        let kind = intent.kind();
        let summary = IntentSummary::describe(rel, &intent, before);
        if self.broker.confirm(summary) == Decision::Denied {
            self.observer
                .verbose_log(&format!("mutation denied: {kind} {rel}"));
            let report = MutationReport::new(rel, kind, MutationStatus::Denied);
            self.journal_report(&report);
            return Ok(report);
        }

        let outcome = self
            .vault
            .commit_mutation(intent, &self.cancel)
            .with_context(|| format!("commit {kind} {rel}"))?;
        let report = match outcome {
            CommitOutcome::Committed(receipt) => MutationReport {
                version_id: Some(receipt.version_id),
                sha256: receipt.fingerprint.map(|fp| fp.to_string()),
                archived_version_id: receipt.archived.map(|record| record.version_id),
                restored_from,
                ..MutationReport::new(rel, kind, MutationStatus::Committed)
            },
            CommitOutcome::Rejected(reason) => MutationReport::rejected(rel, kind, reason),
            CommitOutcome::Cancelled => MutationReport::new(rel, kind, MutationStatus::Cancelled),
        };
        self.journal_report(&report);
        Ok(report)
    }

    fn journal_report(&self, report: &MutationReport) {
        let path = report.path.clone();
        let kind = report.kind.to_string();
        let event = match (report.status, report.restored_from, report.version_id) {
            (MutationStatus::Committed, Some(from_version_id), Some(version_id)) => {
                EventKind::VersionRestoredV1 {
                    path,
                    from_version_id,
                    version_id,
                }
            }
            (MutationStatus::Committed, _, Some(version_id)) => EventKind::MutationCommittedV1 {
                path,
                kind,
                version_id,
                archived_version_id: report.archived_version_id,
            },
            (MutationStatus::Rejected, ..) => EventKind::MutationRejectedV1 {
                path,
                kind,
                reason: report
                    .reason
                    .as_ref()
                    .map(|reason| reason.code().to_string())
                    .unwrap_or_default(),
            },
            (MutationStatus::Denied, ..) => EventKind::MutationDeniedV1 { path, kind },
            (MutationStatus::Cancelled, ..) | (MutationStatus::Committed, _, None) => {
                EventKind::MutationCancelledV1 { path, kind }
            }
        };
        self.emit(event);
    }

    // The mutation has already happened; a journal failure must not undo
    // or mask it.
    fn emit(&self, kind: EventKind) {
        if let Err(err) = self.journal(kind) {
            self.observer
                .warn_log(&format!("failed to journal mutation event: {err}"));
        }
    }

    fn journal(&self, kind: EventKind) -> Result<()> {
        let event = EventEnvelope {
            seq_no: self.store.next_seq_no(self.session_id)?,
            at: Utc::now(),
            session_id: self.session_id,
            kind,
        };
        self.store.append_event(&event)?;
        self.observer.record_event(&event)
    }

    fn run_tool(&self, call: &ToolCall) -> Result<serde_json::Value> {
        let name = call
            .tool_name()
            .ok_or_else(|| anyhow!("unknown tool: {}", call.name))?;
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("path missing"))?;
        match name {
            ToolName::FsRead => {
                let line = |key: &str| {
                    call.args
                        .get(key)
                        .and_then(|v| v.as_u64())
                        .map(|v| v as usize)
                };
                let max_bytes = call
                    .args
                    .get("max_bytes")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(READ_MAX_BYTES_DEFAULT);
                self.read(path, line("start_line"), line("end_line"), max_bytes)
            }
            ToolName::FsWrite => {
                let content = call
                    .args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("content missing"))?;
                let report = self.write(path, content.as_bytes().to_vec(), expected_arg(call)?)?;
                report_json(&report)
            }
            ToolName::FsEdit => {
                let ops = EditOp::list_from_args(&call.args)?;
                let (report, replacements) = self.edit(path, &ops)?;
                let mut output = report_json(&report)?;
                output["edited"] = json!(report.committed());
                output["replacements"] = json!(replacements);
                Ok(output)
            }
            ToolName::FsDelete => {
                report_json(&self.delete(path, expected_arg(call)?)?)
            }
            ToolName::FsRestore => {
                let version_id = call
                    .args
                    .get("version_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("version_id missing"))?;
                let version_id = Uuid::parse_str(version_id)
                    .map_err(|err| anyhow!("invalid version_id '{version_id}': {err}"))?;
                report_json(&self.restore(path, version_id)?)
            }
            ToolName::FsVersions => {
                let records = self.versions(path)?;
                Ok(json!({"path": path, "versions": records}))
            }
        }
    }
}

impl ToolHost for FileToolHost {
    fn propose(&self, call: ToolCall) -> ToolProposal {
        let proposal = ToolProposal {
            invocation_id: Uuid::now_v7(),
            approved: !self.policy.requires_approval(&call),
            call,
        };
        if proposal
            .call
            .tool_name()
            .is_some_and(|name| !name.is_read_only())
        {
            self.emit(EventKind::ToolProposedV1 {
                proposal: proposal.clone(),
            });
        }
        proposal
    }

    fn execute(&self, approved: ApprovedToolCall) -> ToolResult {
        let call = approved.call;
        let (success, output) = match self.run_tool(&call) {
            Ok(output) => {
                let landed = output
                    .get("status")
                    .and_then(|v| v.as_str())
                    .is_none_or(|status| status == "committed");
                (landed, output)
            }
            Err(err) => {
                let message = self.policy.redact(&format!("{err:#}"));
                self.observer
                    .verbose_log(&format!("{} failed: {message}", call.name));
                (false, json!({"error": message}))
            }
        };
        let result = ToolResult {
            invocation_id: approved.invocation_id,
            success,
            output,
        };
        if call.tool_name().is_some_and(|name| !name.is_read_only()) {
            self.emit(EventKind::ToolResultV1 {
                result: result.clone(),
            });
        }
        result
    }
}

fn report_json(report: &MutationReport) -> Result<serde_json::Value> {
    let mut output = serde_json::to_value(report)?;
    output["committed"] = json!(report.committed());
    Ok(output)
}

fn expected_arg(call: &ToolCall) -> Result<Option<Fingerprint>> {
    match call.args.get("expected_sha256").and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => Fingerprint::parse(raw)
            .map(Some)
            .ok_or_else(|| errors::invalid_fingerprint(raw).into_error()),
    }
}

fn is_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.contains(&0) {
        return true;
    }
    let sample = bytes.iter().take(8192);
    let non_text = sample
        .filter(|b| !(b.is_ascii() || **b == b'\n' || **b == b'\r' || **b == b'\t'))
        .count();
    non_text > 64
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "md" => "text/markdown",
        "txt" | "log" | "rs" | "toml" | "json" | "yaml" | "yml" | "js" | "ts" | "py" | "go"
        | "c" | "h" | "sh" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn collect_lines(
    content: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Vec<serde_json::Value> {
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(usize::MAX).max(start);
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, text)| {
            let line = idx + 1;
            if line < start || line > end {
                return None;
            }
            Some(json!({
                "line": line,
                "text": text
            }))
        })
        .collect()
}
