//! YAML front matter split/parse/render for task files.

use super::TaskError;
use super::model::TaskMeta;

/// Split raw file content into `(yaml, body)`.
///
/// The file must start with a `---` line; the YAML runs until the next line
/// that is exactly `---`. Both LF and CRLF line endings are accepted.
pub fn split(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest
        .strip_prefix('\n')
        .or_else(|| rest.strip_prefix("\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

/// Parse a task file into its front matter and body.
pub fn parse(path_label: &str, content: &str) -> Result<(TaskMeta, String), TaskError> {
    let (yaml, body) = split(content).ok_or_else(|| TaskError::Parse {
        path: path_label.to_string(),
        message: "missing front matter".to_string(),
    })?;
    let meta: TaskMeta = serde_yaml::from_str(yaml).map_err(|e| TaskError::Parse {
        path: path_label.to_string(),
        message: e.to_string(),
    })?;
    Ok((meta, body.trim_start_matches(['\r', '\n']).to_string()))
}

/// Render front matter and body back into file content.
pub fn render(meta: &TaskMeta, body: &str) -> Result<String, TaskError> {
    let yaml = serde_yaml::to_string(meta).map_err(|e| TaskError::Parse {
        path: meta.id.clone(),
        message: format!("failed to serialize front matter: {e}"),
    })?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str("---\n");
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n\n");
    out.push_str(body.trim_end());
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::model::{Priority, TaskStatus};

    const SAMPLE: &str = "---\nid: TASK-0003\ntitle: Add login endpoint\nstatus: backlog\npriority: high\nassignee: backend\ncreated: 2026-01-02T10:00:00Z\nupdated: 2026-01-02T10:00:00Z\ntags: [api, auth]\nsprint: 4\n---\n\nImplement POST /login.\n";

    #[test]
    fn split_lf_and_crlf() {
        let (yaml, body) = split("---\na: 1\n---\nbody\n").unwrap();
        assert_eq!(yaml, "a: 1\n");
        assert_eq!(body, "body\n");

        let (yaml, body) = split("---\r\na: 1\r\n---\r\nbody").unwrap();
        assert_eq!(yaml, "a: 1\r\n");
        assert_eq!(body, "body");
    }

    #[test]
    fn split_rejects_missing_delimiters() {
        assert!(split("no front matter").is_none());
        assert!(split("---\na: 1\nstill yaml").is_none());
    }

    #[test]
    fn parse_reads_known_fields() {
        let (meta, body) = parse("sample", SAMPLE).unwrap();
        assert_eq!(meta.id, "TASK-0003");
        assert_eq!(meta.status, TaskStatus::Backlog);
        assert_eq!(meta.priority, Priority::High);
        assert_eq!(meta.assignee.as_deref(), Some("backend"));
        assert_eq!(meta.tags, vec!["api", "auth"]);
        assert_eq!(body, "Implement POST /login.\n");
    }

    #[test]
    fn unknown_keys_survive_render() {
        let (meta, body) = parse("sample", SAMPLE).unwrap();
        assert!(meta.extra.contains_key("sprint"));
        let rendered = render(&meta, &body).unwrap();
        assert!(rendered.contains("sprint: 4"));
        let (again, _) = parse("rendered", &rendered).unwrap();
        assert_eq!(again, meta);
    }

    #[test]
    fn parse_without_front_matter_is_error() {
        let err = parse("plain.md", "# Just a heading\n").unwrap_err();
        assert!(err.to_string().contains("missing front matter"));
    }

    #[test]
    fn parse_defaults_priority() {
        let content = "---\nid: TASK-0001\ntitle: t\nstatus: inbox\ncreated: 2026-01-02T10:00:00Z\nupdated: 2026-01-02T10:00:00Z\n---\n";
        let (meta, body) = parse("min", content).unwrap();
        assert_eq!(meta.priority, Priority::Medium);
        assert!(meta.assignee.is_none());
        assert!(body.is_empty());
    }
}
