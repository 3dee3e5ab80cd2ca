//! User-facing error messages and recovery suggestions for Scribe.

use anyhow::Error;
use scribe_policy::PolicyError;
use scribe_vault::{RejectReason, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;

/// Error with a user-friendly message and recovery suggestions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub error_type: ErrorType,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    /// Invalid settings files or policy patterns
    Configuration,
    /// Blocked paths, denied confirmations, OS permission failures
    Permission,
    /// The file changed since it was last read
    Conflict,
    /// Bad input: unknown version, malformed fingerprint, relative path
    Validation,
    /// Disk, archive, or rename failures
    Storage,
    Unknown,
}

impl EnhancedError {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            suggestions: Vec::new(),
            error_type,
            context: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Machine-readable form for `--json` output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.title,
            "message": self.message,
            "type": self.error_type.label(),
            "exit_code": self.error_type.exit_code(),
            "suggestions": self.suggestions,
        })
    }

    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    /// Format error for display
    pub fn format(&self, verbose: bool) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}: {}\n", self.error_type.label(), self.title));
        output.push_str(&format!("  {}\n", self.message));

        if verbose {
            if let Some(context) = &self.context {
                output.push_str(&format!("\n  Context: {}\n", context));
            }
        }

        if !self.suggestions.is_empty() {
            output.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl ErrorType {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "config",
            ErrorType::Permission => "denied",
            ErrorType::Conflict => "conflict",
            ErrorType::Validation => "invalid",
            ErrorType::Storage => "storage",
            ErrorType::Unknown => "error",
        }
    }

    /// Process exit code the CLI uses for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorType::Conflict => 3,
            ErrorType::Permission => 4,
            ErrorType::Validation | ErrorType::Configuration => 2,
            ErrorType::Storage | ErrorType::Unknown => 1,
        }
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

impl std::error::Error for EnhancedError {}

pub struct ErrorHandler {
    verbose: bool,
    show_suggestions: bool,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            verbose: false,
            show_suggestions: true,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn show_suggestions(mut self, show: bool) -> Self {
        self.show_suggestions = show;
        self
    }

    /// Render an error for the terminal.
    pub fn handle(&self, error: &Error) -> String {
        let mut enhanced = self.enhance(error);
        if !self.show_suggestions {
            enhanced.suggestions.clear();
        }
        enhanced.format(self.verbose)
    }

    /// Classify any error, looking through its cause chain for the typed
    /// errors this workspace produces.
    pub fn enhance(&self, error: &Error) -> EnhancedError {
        if let Some(enhanced) = error.downcast_ref::<EnhancedError>() {
            return enhanced.clone();
        }
        let chain = format!("{error:#}");
        for cause in error.chain() {
            if let Some(vault) = cause.downcast_ref::<VaultError>() {
                return from_vault_error(vault).with_context(chain);
            }
            if let Some(policy) = cause.downcast_ref::<PolicyError>() {
                return from_policy_error(policy).with_context(chain);
            }
        }
        self.classify_error(&error.to_string()).with_context(chain)
    }

    fn classify_error(&self, error_message: &str) -> EnhancedError {
        let lower_error = error_message.to_lowercase();

        for reason in ["HASH_MISMATCH", "NOT_FOUND", "ALREADY_EXISTS", "NO_CHANGE"] {
            if error_message.contains(reason) {
                return EnhancedError::new("File Changed", error_message, ErrorType::Conflict)
                    .with_suggestions(stale_suggestions());
            }
        }

        if lower_error.contains("settings") || lower_error.contains("configuration") {
            return EnhancedError::new(
                "Configuration Error",
                error_message,
                ErrorType::Configuration,
            )
            .with_suggestions(vec![
                "Check .scribe/settings.json and .scribe/settings.local.json".to_string(),
                "Run `scribe config show` to see the merged configuration".to_string(),
            ]);
        }

        if lower_error.contains("permission")
            || lower_error.contains("access")
            || lower_error.contains("denied")
        {
            return EnhancedError::new("Permission Error", error_message, ErrorType::Permission)
                .with_suggestions(vec![
                    "Check file permissions".to_string(),
                    "Pass --yes to approve the mutation without a prompt".to_string(),
                ]);
        }

        EnhancedError::new("Error", error_message, ErrorType::Unknown)
            .with_suggestion("Re-run with -v for details")
    }
}

fn stale_suggestions() -> Vec<String> {
    vec![
        "Re-read the file with `scribe fingerprint <path>` and retry".to_string(),
        "Run `scribe versions list <path>` to see what was archived".to_string(),
    ]
}

fn from_vault_error(error: &VaultError) -> EnhancedError {
    let message = error.to_string();
    match error {
        VaultError::InvalidPath { .. } => {
            EnhancedError::new("Invalid Path", message, ErrorType::Validation)
                .with_suggestion("Pass a file path inside the workspace")
        }
        VaultError::ArchiveConflict { .. } => {
            EnhancedError::new("Archive Conflict", message, ErrorType::Storage).with_suggestions(
                vec![
                    "Another process archived different content under the same version id"
                        .to_string(),
                    "Observe the file again and retry the mutation".to_string(),
                ],
            )
        }
        VaultError::Serde { .. } => {
            EnhancedError::new("Archive Record Error", message, ErrorType::Storage)
                .with_suggestion("Inspect the version archive under .scribe/versions")
        }
        VaultError::Io { .. } | VaultError::Persist { .. } => match error.io_kind() {
            Some(ErrorKind::PermissionDenied) => {
                EnhancedError::new("Permission Error", message, ErrorType::Permission)
                    .with_suggestion("Check file and directory permissions")
            }
            Some(ErrorKind::StorageFull) => {
                EnhancedError::new("Disk Full", message, ErrorType::Storage)
                    .with_suggestion("Free disk space or prune old versions with `scribe versions prune`")
            }
            _ => EnhancedError::new("File System Error", message, ErrorType::Storage)
                .with_suggestion("The target file was left unchanged; retry once the cause is fixed"),
        },
    }
}

fn from_policy_error(error: &PolicyError) -> EnhancedError {
    let message = error.to_string();
    match error {
        PolicyError::PathTraversal(_) | PolicyError::OutsideWorkspace(_) => {
            EnhancedError::new("Path Outside Workspace", message, ErrorType::Permission)
                .with_suggestion("Use a path inside the workspace root")
        }
        PolicyError::BlockedPath { .. } => {
            EnhancedError::new("Blocked Path", message, ErrorType::Permission)
                .with_suggestion("Adjust policy.block_paths in .scribe/settings.json if intended")
        }
        PolicyError::InvalidBlockPattern { .. } | PolicyError::InvalidRedactPattern { .. } => {
            EnhancedError::new("Invalid Policy", message, ErrorType::Configuration)
                .with_suggestion("Fix the pattern in .scribe/settings.json")
        }
    }
}

/// Constructors for errors the CLI raises directly.
pub mod errors {
    use super::*;

    pub fn rejected(path: &str, reason: &RejectReason) -> EnhancedError {
        match reason {
            RejectReason::NoChange => EnhancedError::new(
                "No Change",
                format!("The edit would not change '{path}'."),
                ErrorType::Validation,
            ),
            other => EnhancedError::new(
                "File Changed",
                format!("'{path}' changed since it was last read ({}).", other.code()),
                ErrorType::Conflict,
            )
            .with_suggestions(stale_suggestions()),
        }
    }

    pub fn version_not_found(path: &str, version: &str) -> EnhancedError {
        EnhancedError::new(
            "Version Not Found",
            format!("No intact archived version '{version}' for '{path}'."),
            ErrorType::Validation,
        )
        .with_suggestion(format!("Run `scribe versions list {path}`"))
    }

    pub fn invalid_fingerprint(value: &str) -> EnhancedError {
        EnhancedError::new(
            "Invalid Fingerprint",
            format!("'{value}' is not a 64-character hex SHA-256 digest."),
            ErrorType::Validation,
        )
        .with_suggestion("Copy the value printed by `scribe fingerprint <path>`")
    }

    pub fn mutation_denied(path: &str) -> EnhancedError {
        EnhancedError::new(
            "Mutation Denied",
            format!("The change to '{path}' was not approved."),
            ErrorType::Permission,
        )
        .with_suggestion("Pass --yes to approve without a prompt")
    }

    pub fn cancelled(path: &str) -> EnhancedError {
        EnhancedError::new(
            "Cancelled",
            format!("The change to '{path}' was cancelled before it was applied."),
            ErrorType::Unknown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};
    use scribe_vault::Fingerprint;
    use std::io;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[test]
    fn enhanced_error_formatting() {
        let error = EnhancedError::new("Test Error", "Something went wrong", ErrorType::Storage)
            .with_suggestion("Try again")
            .with_context("detail");

        let quiet = error.format(false);
        assert!(quiet.starts_with("storage: Test Error"));
        assert!(quiet.contains("Suggestions:"));
        assert!(!quiet.contains("Context"));
        assert!(error.format(true).contains("Context: detail"));
    }

    #[test]
    fn vault_errors_are_found_through_context_layers() {
        let handler = ErrorHandler::new();
        let error = Err::<(), _>(VaultError::ArchiveConflict {
            path: PathBuf::from("/w/a.txt"),
            version_id: Uuid::now_v7(),
        })
        .context("commit fs.write")
        .expect_err("error");
        let enhanced = handler.enhance(&error);
        assert_eq!(enhanced.title, "Archive Conflict");
        assert_eq!(enhanced.error_type, ErrorType::Storage);
    }

    #[test]
    fn permission_denied_io_is_a_permission_error() {
        let error = anyhow::Error::new(VaultError::Persist {
            path: PathBuf::from("/w/ro.txt"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        let enhanced = ErrorHandler::new().enhance(&error);
        assert_eq!(enhanced.error_type, ErrorType::Permission);
        assert_eq!(enhanced.error_type.exit_code(), 4);
    }

    #[test]
    fn policy_errors_map_to_permission() {
        let error = anyhow::Error::new(PolicyError::BlockedPath {
            path: ".env".to_string(),
            pattern: ".env".to_string(),
        });
        let output = ErrorHandler::new().handle(&error);
        assert!(output.contains("Blocked Path"));
        assert!(output.contains("block_paths"));
    }

    #[test]
    fn reject_codes_in_plain_messages_are_conflicts() {
        let output = ErrorHandler::new()
            .show_suggestions(false)
            .handle(&anyhow!("write rejected: HASH_MISMATCH"));
        assert!(output.starts_with("conflict: File Changed"));
        assert!(!output.contains("Suggestions:"));
    }

    #[test]
    fn into_error_preserves_enhanced_type() {
        let reason = RejectReason::HashMismatch {
            expected: Fingerprint::of(b"a"),
            actual: Fingerprint::of(b"b"),
        };
        let error = errors::rejected("a.txt", &reason).into_error();
        let enhanced = ErrorHandler::new().enhance(&error);
        assert_eq!(enhanced.error_type, ErrorType::Conflict);
        assert!(enhanced.message.contains("HASH_MISMATCH"));
        assert_eq!(
            errors::rejected("a.txt", &RejectReason::NoChange).error_type,
            ErrorType::Validation
        );
    }
}
