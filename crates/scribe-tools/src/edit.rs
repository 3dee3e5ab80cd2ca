use anyhow::{Result, anyhow};
use serde_json::Value;

/// One in-place change to text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    Replace {
        search: String,
        replace: String,
        all: bool,
    },
    Lines {
        start_line: usize,
        end_line: usize,
        replacement: String,
    },
}

impl EditOp {
    /// Accepts `{search, replace, all?}` or `{start_line, end_line, replacement}`.
    pub fn from_json(edit: &Value) -> Result<Self> {
        if let (Some(search), Some(replace)) = (
            edit.get("search").and_then(|v| v.as_str()),
            edit.get("replace").and_then(|v| v.as_str()),
        ) {
            return Ok(Self::Replace {
                search: search.to_string(),
                replace: replace.to_string(),
                all: edit.get("all").and_then(|v| v.as_bool()).unwrap_or(true),
            });
        }
        if let (Some(start_line), Some(end_line), Some(replacement)) = (
            edit.get("start_line").and_then(|v| v.as_u64()),
            edit.get("end_line").and_then(|v| v.as_u64()),
            edit.get("replacement").and_then(|v| v.as_str()),
        ) {
            return Ok(Self::Lines {
                start_line: start_line as usize,
                end_line: end_line as usize,
                replacement: replacement.to_string(),
            });
        }
        Err(anyhow!(
            "edit requires either search+replace or start_line+end_line+replacement"
        ))
    }

    /// Reads either a single edit from `args` or a list under `args.edits`.
    pub fn list_from_args(args: &Value) -> Result<Vec<Self>> {
        match args.get("edits").and_then(|v| v.as_array()) {
            Some(edits) => edits.iter().map(Self::from_json).collect(),
            None => Ok(vec![Self::from_json(args)?]),
        }
    }

    /// Applies the edit and returns how many replacements were made.
    pub fn apply(&self, content: &mut String) -> Result<usize> {
        match self {
            Self::Replace {
                search,
                replace,
                all,
            } => {
                if search.is_empty() {
                    return Err(anyhow!("search pattern must not be empty"));
                }
                if *all {
                    let count = content.matches(search.as_str()).count();
                    if count == 0 {
                        return Err(anyhow!("search pattern not found: {search}"));
                    }
                    *content = content.replace(search.as_str(), replace);
                    return Ok(count);
                }
                let Some(pos) = content.find(search.as_str()) else {
                    return Err(anyhow!("search pattern not found: {search}"));
                };
                content.replace_range(pos..pos + search.len(), replace);
                Ok(1)
            }
            Self::Lines {
                start_line,
                end_line,
                replacement,
            } => {
                let (start, end) = (*start_line, *end_line);
                if start == 0 || end < start {
                    return Err(anyhow!(
                        "invalid line range: start_line={start} end_line={end}"
                    ));
                }
                let had_trailing_newline = content.ends_with('\n');
                let mut lines = content.lines().map(ToString::to_string).collect::<Vec<_>>();
                if end > lines.len() {
                    return Err(anyhow!(
                        "line range out of bounds: end_line={end} file_lines={}",
                        lines.len()
                    ));
                }
                let replacement_lines = replacement
                    .split('\n')
                    .map(ToString::to_string)
                    .collect::<Vec<_>>();
                lines.splice((start - 1)..end, replacement_lines);
                *content = lines.join("\n");
                if had_trailing_newline {
                    content.push('\n');
                }
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_all_and_first_only() {
        let mut text = "a a a".to_string();
        let all = EditOp::from_json(&json!({"search":"a","replace":"b"})).expect("edit");
        assert_eq!(all.apply(&mut text).expect("apply"), 3);
        assert_eq!(text, "b b b");

        let first = EditOp::from_json(&json!({"search":"b","replace":"c","all":false}))
            .expect("edit");
        assert_eq!(first.apply(&mut text).expect("apply"), 1);
        assert_eq!(text, "c b b");
    }

    #[test]
    fn line_range_keeps_trailing_newline() {
        let mut text = "one\ntwo\nthree\n".to_string();
        EditOp::from_json(&json!({"start_line":2,"end_line":2,"replacement":"TWO\n2b"}))
            .expect("edit")
            .apply(&mut text)
            .expect("apply");
        assert_eq!(text, "one\nTWO\n2b\nthree\n");

        let out_of_bounds = EditOp::Lines {
            start_line: 3,
            end_line: 9,
            replacement: String::new(),
        };
        assert!(out_of_bounds.apply(&mut text).is_err());
    }

    #[test]
    fn list_form_and_errors() {
        let ops = EditOp::list_from_args(&json!({
            "path": "x",
            "edits": [
                {"search":"x","replace":"y"},
                {"start_line":1,"end_line":1,"replacement":"z"}
            ]
        }))
        .expect("ops");
        assert_eq!(ops.len(), 2);
        assert!(EditOp::from_json(&json!({"path":"x"})).is_err());
        let mut text = "abc".to_string();
        assert!(
            EditOp::from_json(&json!({"search":"zzz","replace":"y"}))
                .expect("edit")
                .apply(&mut text)
                .is_err()
        );
    }
}
