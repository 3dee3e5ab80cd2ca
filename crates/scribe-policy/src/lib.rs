use glob::Pattern;
use regex::Regex;
use scribe_core::{ApprovalMode, PolicyConfig, ToolCall};
use std::path::{Component, Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("path traversal denied: {0}")]
    PathTraversal(String),
    #[error("path is outside the workspace: {0}")]
    OutsideWorkspace(String),
    #[error("path is blocked by policy pattern '{pattern}': {path}")]
    BlockedPath { path: String, pattern: String },
    #[error("invalid block pattern '{pattern}': {reason}")]
    InvalidBlockPattern { pattern: String, reason: String },
    #[error("invalid redact pattern '{pattern}': {reason}")]
    InvalidRedactPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    cfg: PolicyConfig,
    blocked: Vec<(String, Pattern)>,
    redactors: Vec<Regex>,
}

impl PolicyEngine {
    pub fn new(cfg: PolicyConfig) -> Result<Self, PolicyError> {
        let mut blocked = Vec::with_capacity(cfg.block_paths.len());
        for raw in &cfg.block_paths {
            let pattern = Pattern::new(raw).map_err(|err| PolicyError::InvalidBlockPattern {
                pattern: raw.clone(),
                reason: err.to_string(),
            })?;
            blocked.push((raw.clone(), pattern));
        }
        let mut redactors = Vec::with_capacity(cfg.redact_patterns.len());
        for raw in &cfg.redact_patterns {
            redactors.push(Regex::new(raw).map_err(|err| {
                PolicyError::InvalidRedactPattern {
                    pattern: raw.clone(),
                    reason: err.to_string(),
                }
            })?);
        }
        Ok(Self {
            cfg,
            blocked,
            redactors,
        })
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        self.cfg.approve_edits
    }

    /// Checks a workspace-relative path against traversal and block rules.
    /// A bare entry such as `.ssh` blocks any path with that component; an
    /// entry with glob syntax is matched against the whole relative path.
    pub fn check_path(&self, path: &str) -> Result<(), PolicyError> {
        let candidate = Path::new(path);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PolicyError::PathTraversal(path.to_string()));
        }
        let normalized = path.replace('\\', "/");
        for (raw, pattern) in &self.blocked {
            let hit = if is_glob(raw) {
                pattern.matches(&normalized)
                    || pattern.matches(&format!("./{normalized}"))
                    || candidate
                        .file_name()
                        .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
            } else {
                candidate
                    .components()
                    .any(|c| c.as_os_str().to_string_lossy() == raw.as_str())
            };
            if hit {
                return Err(PolicyError::BlockedPath {
                    path: path.to_string(),
                    pattern: raw.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolves `raw` (relative to `workspace`, or absolute inside it) to an
    /// absolute path, without requiring the path to exist yet.
    pub fn resolve_in_workspace(&self, workspace: &Path, raw: &str) -> Result<PathBuf, PolicyError> {
        let root = normalize(workspace);
        let joined = if Path::new(raw).is_absolute() {
            normalize(Path::new(raw))
        } else {
            if Path::new(raw)
                .components()
                .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(PolicyError::PathTraversal(raw.to_string()));
            }
            normalize(&root.join(raw))
        };
        let relative = joined
            .strip_prefix(&root)
            .map_err(|_| PolicyError::OutsideWorkspace(raw.to_string()))?;
        if relative.as_os_str().is_empty() {
            return Err(PolicyError::OutsideWorkspace(raw.to_string()));
        }
        self.check_path(&relative.to_string_lossy())?;
        Ok(joined)
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for regex in &self.redactors {
            out = regex.replace_all(&out, "[REDACTED]").to_string();
        }
        out
    }

    /// Whether a call must wait for an explicit yes before it commits.
    pub fn requires_approval(&self, call: &ToolCall) -> bool {
        let mutating = call.tool_name().is_some_and(|name| !name.is_read_only());
        (mutating && self.cfg.approve_edits == ApprovalMode::Ask) || call.requires_approval
    }
}

fn is_glob(raw: &str) -> bool {
    raw.contains(['*', '?', '['])
}

// Lexical normalization; symlinks are not resolved.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn policy() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default()).expect("default policy")
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args: json!({}),
            requires_approval: false,
        }
    }

    #[test]
    fn denies_path_traversal_and_blocked_dirs() {
        let policy = policy();
        assert!(matches!(
            policy.check_path("../outside"),
            Err(PolicyError::PathTraversal(_))
        ));
        assert!(matches!(
            policy.check_path(".ssh/config"),
            Err(PolicyError::BlockedPath { .. })
        ));
        assert!(matches!(
            policy.check_path("deploy/keys/id_ed25519"),
            Err(PolicyError::BlockedPath { .. })
        ));
        assert!(policy.check_path("src/main.rs").is_ok());
        assert!(policy.check_path("docs/.environment.md").is_ok());
    }

    #[test]
    fn resolves_inside_workspace_only() {
        let policy = policy();
        let workspace = Path::new("/work/project");
        assert_eq!(
            policy
                .resolve_in_workspace(workspace, "./src/lib.rs")
                .expect("inside"),
            PathBuf::from("/work/project/src/lib.rs")
        );
        assert_eq!(
            policy
                .resolve_in_workspace(workspace, "/work/project/notes.md")
                .expect("absolute inside"),
            PathBuf::from("/work/project/notes.md")
        );
        assert!(matches!(
            policy.resolve_in_workspace(workspace, "/etc/passwd"),
            Err(PolicyError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            policy.resolve_in_workspace(workspace, "/work/project/../other/x"),
            Err(PolicyError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            policy.resolve_in_workspace(workspace, "src/../../x"),
            Err(PolicyError::PathTraversal(_))
        ));
        assert!(matches!(
            policy.resolve_in_workspace(workspace, ".scribe/versions/x"),
            Err(PolicyError::BlockedPath { .. })
        ));
    }

    #[test]
    fn redacts_configured_secret_patterns() {
        let policy = policy();
        let out = policy.redact("api_key=abcd1234efgh and plain text");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("abcd1234efgh"));
        assert!(out.contains("plain text"));
    }

    #[test]
    fn approval_gate_follows_mode_and_tool_type() {
        let ask = policy();
        assert!(ask.requires_approval(&call("fs.write")));
        assert!(ask.requires_approval(&call("fs.restore")));
        assert!(!ask.requires_approval(&call("fs.read")));
        assert!(!ask.requires_approval(&call("fs.versions")));

        let always = PolicyEngine::new(PolicyConfig {
            approve_edits: ApprovalMode::Always,
            ..PolicyConfig::default()
        })
        .expect("policy");
        assert!(!always.requires_approval(&call("fs.delete")));
        let mut flagged = call("fs.read");
        flagged.requires_approval = true;
        assert!(always.requires_approval(&flagged));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let err = PolicyEngine::new(PolicyConfig {
            redact_patterns: vec!["(unclosed".to_string()],
            ..PolicyConfig::default()
        })
        .expect_err("bad regex");
        assert!(matches!(err, PolicyError::InvalidRedactPattern { .. }));
    }

    proptest! {
        #[test]
        fn any_parent_component_is_rejected(prefix in "[a-z]{1,8}", suffix in "[a-z]{1,8}") {
            let path = format!("{prefix}/../{suffix}");
            let rejected = matches!(policy().check_path(&path), Err(PolicyError::PathTraversal(_)));
            prop_assert!(rejected);
        }
    }
}
