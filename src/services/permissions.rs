//! Role permission table — which paths each role may read, write or execute.
//!
//! Patterns are globs: `**` matches across directories, `*` within one path
//! segment, `?` a single non-separator character. They are compiled to
//! anchored regexes once at construction.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

/// Actions a role can be granted on a path.
pub const ACTIONS: [&str; 3] = ["read", "write", "execute"];

struct Rule {
    pattern: String,
    regex: Regex,
}

/// Compiled role → action → patterns table.
pub struct Permissions {
    table: HashMap<String, HashMap<String, Vec<Rule>>>,
}

impl Permissions {
    /// Built-in table, with any role present in `overrides` replaced wholesale.
    pub fn new(overrides: &HashMap<String, HashMap<String, Vec<String>>>) -> Self {
        let mut raw = default_table();
        for (role, actions) in overrides {
            raw.insert(role.to_ascii_lowercase(), actions.clone());
        }

        let mut table = HashMap::new();
        for (role, actions) in raw {
            let mut compiled = HashMap::new();
            for (action, patterns) in actions {
                let rules = patterns
                    .into_iter()
                    .filter_map(|pattern| match glob_to_regex(&pattern) {
                        Ok(regex) => Some(Rule { pattern, regex }),
                        Err(e) => {
                            warn!(%role, %action, %pattern, error = %e, "invalid permission pattern — ignored");
                            None
                        }
                    })
                    .collect();
                compiled.insert(action.to_ascii_lowercase(), rules);
            }
            table.insert(role, compiled);
        }
        Self { table }
    }

    /// `true` if `role` may perform `action` on `path`. Unknown roles and
    /// actions are denied.
    pub fn check(&self, role: &str, action: &str, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.table
            .get(&role.to_ascii_lowercase())
            .and_then(|actions| actions.get(&action.to_ascii_lowercase()))
            .is_some_and(|rules| rules.iter().any(|r| r.regex.is_match(path)))
    }

    /// First pattern that grants access, for explaining a decision.
    pub fn matching_pattern(&self, role: &str, action: &str, path: &str) -> Option<&str> {
        let path = path.trim_start_matches("./");
        self.table
            .get(&role.to_ascii_lowercase())?
            .get(&action.to_ascii_lowercase())?
            .iter()
            .find(|r| r.regex.is_match(path))
            .map(|r| r.pattern.as_str())
    }

    /// Known role names, sorted.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.table.keys().cloned().collect();
        roles.sort();
        roles
    }
}

/// Convert a glob into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches zero directories.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

fn role(entries: Vec<(&str, Vec<&str>)>) -> HashMap<String, Vec<String>> {
    entries
        .into_iter()
        .map(|(action, patterns)| {
            (action.to_string(), patterns.into_iter().map(str::to_string).collect())
        })
        .collect()
}

fn default_table() -> HashMap<String, HashMap<String, Vec<String>>> {
    let mut t = HashMap::new();
    t.insert(
        "pm".to_string(),
        role(vec![("read", vec!["**"]), ("write", vec!["tasks/**", "docs/**", "*.md"]), ("execute", vec![])]),
    );
    t.insert(
        "architect".to_string(),
        role(vec![("read", vec!["**"]), ("write", vec!["docs/**", "adr/**", "*.md"]), ("execute", vec![])]),
    );
    t.insert(
        "backend".to_string(),
        role(vec![
            ("read", vec!["**"]),
            ("write", vec!["src/**", "tests/**", "migrations/**", "Cargo.toml", "Cargo.lock"]),
            ("execute", vec!["scripts/test*", "scripts/build*"]),
        ]),
    );
    t.insert(
        "frontend".to_string(),
        role(vec![
            ("read", vec!["**"]),
            ("write", vec!["ui/**", "web/**", "public/**", "package.json"]),
            ("execute", vec!["scripts/test*", "scripts/build*"]),
        ]),
    );
    t.insert(
        "qa".to_string(),
        role(vec![("read", vec!["**"]), ("write", vec!["tests/**", "**/*_test.*", "**/*.test.*"]), ("execute", vec!["scripts/**"])]),
    );
    t.insert(
        "devops".to_string(),
        role(vec![
            ("read", vec!["**"]),
            ("write", vec![".github/**", "deploy/**", "docker/**", "Dockerfile", "*.toml", "*.yml", "*.yaml"]),
            ("execute", vec!["scripts/**"]),
        ]),
    );
    t.insert(
        "rnd".to_string(),
        role(vec![("read", vec!["**"]), ("write", vec!["research/**", "prototypes/**", "docs/**"]), ("execute", vec![])]),
    );
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms() -> Permissions {
        Permissions::new(&HashMap::new())
    }

    #[test]
    fn glob_semantics() {
        let single = glob_to_regex("src/*.rs").unwrap();
        assert!(single.is_match("src/main.rs"));
        assert!(!single.is_match("src/a/main.rs"));

        let deep = glob_to_regex("src/**").unwrap();
        assert!(deep.is_match("src/a/b/c.rs"));

        let any_dir = glob_to_regex("**/*.test.*").unwrap();
        assert!(any_dir.is_match("login.test.ts"));
        assert!(any_dir.is_match("ui/auth/login.test.ts"));

        let q = glob_to_regex("file?.md").unwrap();
        assert!(q.is_match("file1.md"));
        assert!(!q.is_match("file12.md"));

        let dot = glob_to_regex("Cargo.toml").unwrap();
        assert!(!dot.is_match("CargoXtoml"));
    }

    #[test]
    fn backend_can_write_src_not_ui() {
        let p = perms();
        assert!(p.check("backend", "write", "src/api/login.rs"));
        assert!(p.check("Backend", "WRITE", "./src/lib.rs"));
        assert!(!p.check("backend", "write", "ui/app.tsx"));
        assert!(p.check("backend", "read", "ui/app.tsx"));
    }

    #[test]
    fn unknown_role_or_action_denied() {
        let p = perms();
        assert!(!p.check("intern", "read", "README.md"));
        assert!(!p.check("backend", "delete", "src/lib.rs"));
        assert!(!p.check("architect", "execute", "scripts/deploy.sh"));
    }

    #[test]
    fn overrides_replace_role() {
        let mut overrides = HashMap::new();
        let mut actions = HashMap::new();
        actions.insert("write".to_string(), vec!["only/**".to_string()]);
        overrides.insert("backend".to_string(), actions);

        let p = Permissions::new(&overrides);
        assert!(p.check("backend", "write", "only/x.rs"));
        assert!(!p.check("backend", "write", "src/lib.rs"));
        assert!(!p.check("backend", "read", "src/lib.rs"));
        assert_eq!(p.matching_pattern("backend", "write", "only/x.rs"), Some("only/**"));
    }

    #[test]
    fn roles_sorted() {
        let roles = perms().roles();
        assert!(roles.windows(2).all(|w| w[0] <= w[1]));
        assert!(roles.contains(&"qa".to_string()));
    }
}
