use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".scribe")
}

/// Type-safe name for every built-in file tool.
///
/// Maps between underscored API names (`fs_write`) and dotted internal names (`fs.write`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    FsRead,
    FsWrite,
    FsEdit,
    FsDelete,
    FsRestore,
    FsVersions,
}

impl ToolName {
    /// Parse from underscored API name (e.g. `"fs_write"`).
    #[must_use]
    pub fn from_api_name(s: &str) -> Option<Self> {
        Some(match s {
            "fs_read" => Self::FsRead,
            "fs_write" => Self::FsWrite,
            "fs_edit" => Self::FsEdit,
            "fs_delete" => Self::FsDelete,
            "fs_restore" => Self::FsRestore,
            "fs_versions" => Self::FsVersions,
            _ => return None,
        })
    }

    /// Parse from dotted internal name (e.g. `"fs.write"`).
    #[must_use]
    pub fn from_internal_name(s: &str) -> Option<Self> {
        Some(match s {
            "fs.read" => Self::FsRead,
            "fs.write" => Self::FsWrite,
            "fs.edit" => Self::FsEdit,
            "fs.delete" => Self::FsDelete,
            "fs.restore" => Self::FsRestore,
            "fs.versions" => Self::FsVersions,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_internal(&self) -> &'static str {
        match self {
            Self::FsRead => "fs.read",
            Self::FsWrite => "fs.write",
            Self::FsEdit => "fs.edit",
            Self::FsDelete => "fs.delete",
            Self::FsRestore => "fs.restore",
            Self::FsVersions => "fs.versions",
        }
    }

    #[must_use]
    pub fn as_api_name(&self) -> &'static str {
        match self {
            Self::FsRead => "fs_read",
            Self::FsWrite => "fs_write",
            Self::FsEdit => "fs_edit",
            Self::FsDelete => "fs_delete",
            Self::FsRestore => "fs_restore",
            Self::FsVersions => "fs_versions",
        }
    }

    /// Whether this tool only inspects state and never commits a mutation.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::FsRead | Self::FsVersions)
    }

    pub const ALL: &'static [ToolName] = &[
        Self::FsRead,
        Self::FsWrite,
        Self::FsEdit,
        Self::FsDelete,
        Self::FsRestore,
        Self::FsVersions,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
    pub requires_approval: bool,
}

impl ToolCall {
    /// Returns `None` for unknown tool names.
    #[must_use]
    pub fn tool_name(&self) -> Option<ToolName> {
        ToolName::from_internal_name(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProposal {
    pub invocation_id: Uuid,
    pub call: ToolCall,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedToolCall {
    pub invocation_id: Uuid,
    pub call: ToolCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: Uuid,
    pub success: bool,
    pub output: serde_json::Value,
}

pub trait ToolHost {
    fn propose(&self, call: ToolCall) -> ToolProposal;
    fn execute(&self, approved: ApprovedToolCall) -> ToolResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    ToolProposedV1 {
        proposal: ToolProposal,
    },
    ToolResultV1 {
        result: ToolResult,
    },
    MutationCommittedV1 {
        path: String,
        kind: String,
        version_id: Uuid,
        archived_version_id: Option<Uuid>,
    },
    MutationRejectedV1 {
        path: String,
        kind: String,
        reason: String,
    },
    MutationDeniedV1 {
        path: String,
        kind: String,
    },
    MutationCancelledV1 {
        path: String,
        kind: String,
    },
    VersionRestoredV1 {
        path: String,
        from_version_id: Uuid,
        version_id: Uuid,
    },
    VersionsPrunedV1 {
        path: String,
        removed: Vec<Uuid>,
    },
}

impl EventKind {
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::ToolProposedV1 { .. } | Self::ToolResultV1 { .. } => "tool",

            Self::MutationCommittedV1 { .. }
            | Self::MutationRejectedV1 { .. }
            | Self::MutationDeniedV1 { .. }
            | Self::MutationCancelledV1 { .. } => "mutation",

            Self::VersionRestoredV1 { .. } | Self::VersionsPrunedV1 { .. } => "version",
        }
    }

    /// Target path for mutation and version events.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::MutationCommittedV1 { path, .. }
            | Self::MutationRejectedV1 { path, .. }
            | Self::MutationDeniedV1 { path, .. }
            | Self::MutationCancelledV1 { path, .. }
            | Self::VersionRestoredV1 { path, .. }
            | Self::VersionsPrunedV1 { path, .. } => Some(path),
            Self::ToolProposedV1 { .. } | Self::ToolResultV1 { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub policy: PolicyConfig,
    pub archive: ArchiveConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".scribe/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

/// Controls whether a mutation needs an explicit yes before it may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Ask,
    Always,
    Never,
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ask => write!(f, "ask"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for ApprovalMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "always" | "yes" | "auto" => Ok(Self::Always),
            "never" | "false" | "off" => Ok(Self::Never),
            other => Err(anyhow::anyhow!(
                "invalid approval mode '{}' (expected ask|always|never)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub approve_edits: ApprovalMode,
    pub block_paths: Vec<String>,
    pub redact_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            approve_edits: ApprovalMode::Ask,
            block_paths: vec![
                ".env".to_string(),
                ".ssh".to_string(),
                ".aws".to_string(),
                ".gnupg".to_string(),
                ".git".to_string(),
                ".scribe".to_string(),
                "**/id_*".to_string(),
            ],
            redact_patterns: vec![
                "(?i)(api[_-]?key|token|secret|password)\\s*[:=]\\s*['\\\"]?[a-z0-9_\\-]{8,}['\\\"]?".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Version store root. Relative paths resolve against the workspace.
    pub root: Option<String>,
    pub retention: RetentionConfig,
}

impl ArchiveConfig {
    pub fn resolve_root(&self, workspace: &Path) -> PathBuf {
        match self.root.as_deref().map(str::trim) {
            Some(root) if !root.is_empty() => {
                let candidate = Path::new(root);
                if candidate.is_absolute() {
                    candidate.to_path_buf()
                } else {
                    workspace.join(candidate)
                }
            }
            _ => runtime_dir(workspace).join("versions"),
        }
    }
}

/// Retention limits applied by `versions prune`. Unset means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_versions: Option<usize>,
    pub max_age_days: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn temp_workspace() -> PathBuf {
        let workspace =
            std::env::temp_dir().join(format!("scribe-core-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&workspace).expect("workspace");
        workspace
    }

    proptest! {
        #[test]
        fn merge_json_value_is_idempotent_for_flat_objects(
            base in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            overlay in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
        ) {
            let mut base_value = json!(base);
            let overlay_value = json!(overlay);
            merge_json_value(&mut base_value, &overlay_value);
            let once = base_value.clone();
            merge_json_value(&mut base_value, &overlay_value);
            prop_assert_eq!(base_value, once);
        }

        #[test]
        fn approval_mode_parse_ignores_case_and_padding(
            mode in prop_oneof![Just("ask"), Just("always"), Just("never")],
            upper in any::<bool>(),
            pad in 0usize..3,
        ) {
            let raw = if upper { mode.to_ascii_uppercase() } else { mode.to_string() };
            let candidate = format!("{}{}{}", " ".repeat(pad), raw, " ".repeat(pad));
            let parsed: ApprovalMode = candidate.parse().expect("parse");
            prop_assert_eq!(parsed.to_string(), mode);
        }
    }

    #[test]
    fn tool_names_round_trip_between_api_and_internal_forms() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::from_api_name(tool.as_api_name()), Some(*tool));
            assert_eq!(ToolName::from_internal_name(tool.as_internal()), Some(*tool));
        }
        assert!(ToolName::FsRead.is_read_only());
        assert!(!ToolName::FsDelete.is_read_only());
        assert_eq!(ToolName::from_internal_name("bash.run"), None);
    }

    #[test]
    fn project_local_settings_override_project_settings() {
        let workspace = temp_workspace();
        fs::create_dir_all(runtime_dir(&workspace)).expect("runtime dir");
        fs::write(
            AppConfig::project_settings_path(&workspace),
            r#"{"policy":{"approve_edits":"never"},"archive":{"retention":{"max_versions":5}}}"#,
        )
        .expect("project settings");
        fs::write(
            AppConfig::project_local_settings_path(&workspace),
            r#"{"policy":{"approve_edits":"always"}}"#,
        )
        .expect("local settings");

        let cfg = AppConfig::load(&workspace).expect("load");
        assert_eq!(cfg.policy.approve_edits, ApprovalMode::Always);
        assert_eq!(cfg.archive.retention.max_versions, Some(5));
        assert!(!cfg.policy.block_paths.is_empty());
    }

    #[test]
    fn archive_root_defaults_under_runtime_dir() {
        let workspace = PathBuf::from("/work/repo");
        let cfg = ArchiveConfig::default();
        assert_eq!(
            cfg.resolve_root(&workspace),
            PathBuf::from("/work/repo/.scribe/versions")
        );
        let custom = ArchiveConfig {
            root: Some("history".to_string()),
            retention: RetentionConfig::default(),
        };
        assert_eq!(
            custom.resolve_root(&workspace),
            PathBuf::from("/work/repo/history")
        );
    }

    #[test]
    fn mutation_events_expose_category_and_path() {
        let kind = EventKind::MutationRejectedV1 {
            path: "src/lib.rs".to_string(),
            kind: "update".to_string(),
            reason: "HASH_MISMATCH".to_string(),
        };
        assert_eq!(kind.category(), "mutation");
        assert_eq!(kind.path(), Some("src/lib.rs"));
        let encoded = serde_json::to_value(&kind).expect("encode");
        assert_eq!(encoded["type"], "MutationRejectedV1");
        assert_eq!(encoded["payload"]["reason"], "HASH_MISMATCH");
    }
}
