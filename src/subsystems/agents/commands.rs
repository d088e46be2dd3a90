//! Slash-command parsing for the PM agent.

pub const HELP: &str = "\
Commands:
  /new <text>                create a task (the rest of the message is the request)
  /list [status]             list tasks, optionally in one status
  /show <id>                 show a task
  /move <id> <status>        move a task (inbox, backlog, in-progress, review, blocked, completed, archive)
  /assign <id> <role|none>   set or clear the assignee
  /priority <id> <level>     low, medium, high, critical
  /note <id> <text>          append a note
  /triage                    triage the inbox now
  /standup                   stand-up digest
  /ask <role> <id>           ask a specialist for notes on a task
  /can <role> <action> <path> check the permission table
  /flags                     list feature flags
  /flag <name> on|off        toggle a feature flag
  /health                    subsystem health
  /branch <id>               create the git branch for a task
  /test                      run the test command
  /archive [days]            archive tasks completed more than N days ago (default 7)
Anything that is not a command becomes a new task.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    New(String),
    List(Option<String>),
    Show(String),
    Move { id: String, status: String },
    Assign { id: String, assignee: String },
    Priority { id: String, level: String },
    Note { id: String, text: String },
    Triage,
    Standup,
    Ask { role: String, id: String },
    Can { role: String, action: String, path: String },
    Flags,
    Flag { name: String, value: String },
    Health,
    Branch(String),
    Test,
    Archive(Option<String>),
    /// Known command with missing arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// Parse a chat line. `None` when the line is not a command.
///
/// Telegram's `/cmd@botname` form is accepted.
pub fn parse(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((h, a)) => (h, a.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let words: Vec<&str> = args.split_whitespace().collect();

    let cmd = match name.as_str() {
        "help" | "start" => Command::Help,
        "new" | "task" => match args {
            "" => Command::Usage("/new <text>"),
            text => Command::New(text.to_string()),
        },
        "list" | "ls" => Command::List(words.first().map(|s| s.to_string())),
        "show" => match words.as_slice() {
            [id, ..] => Command::Show(id.to_string()),
            _ => Command::Usage("/show <id>"),
        },
        "move" | "mv" => match words.as_slice() {
            [id, status, ..] => Command::Move { id: id.to_string(), status: status.to_string() },
            _ => Command::Usage("/move <id> <status>"),
        },
        "assign" => match words.as_slice() {
            [id, assignee, ..] => Command::Assign { id: id.to_string(), assignee: assignee.to_string() },
            _ => Command::Usage("/assign <id> <role|none>"),
        },
        "priority" | "prio" => match words.as_slice() {
            [id, level, ..] => Command::Priority { id: id.to_string(), level: level.to_string() },
            _ => Command::Usage("/priority <id> <level>"),
        },
        "note" => match args.split_once(char::is_whitespace) {
            Some((id, text)) if !text.trim().is_empty() => {
                Command::Note { id: id.to_string(), text: text.trim().to_string() }
            }
            _ => Command::Usage("/note <id> <text>"),
        },
        "triage" => Command::Triage,
        "standup" => Command::Standup,
        "ask" => match words.as_slice() {
            [role, id, ..] => Command::Ask { role: role.to_ascii_lowercase(), id: id.to_string() },
            _ => Command::Usage("/ask <role> <id>"),
        },
        "can" => match words.as_slice() {
            [role, action, path, ..] => Command::Can {
                role: role.to_ascii_lowercase(),
                action: action.to_ascii_lowercase(),
                path: path.to_string(),
            },
            _ => Command::Usage("/can <role> <action> <path>"),
        },
        "flags" => Command::Flags,
        "flag" => match words.as_slice() {
            [name, value, ..] => Command::Flag { name: name.to_ascii_lowercase(), value: value.to_string() },
            _ => Command::Usage("/flag <name> on|off"),
        },
        "health" | "status" => Command::Health,
        "branch" => match words.as_slice() {
            [id, ..] => Command::Branch(id.to_string()),
            _ => Command::Usage("/branch <id>"),
        },
        "test" | "tests" => Command::Test,
        "archive" => Command::Archive(words.first().map(|s| s.to_string())),
        _ => Command::Unknown(name),
    };
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("please add a login page"), None);
        assert_eq!(parse("  "), None);
    }

    #[test]
    fn arguments_are_split() {
        assert_eq!(
            parse("/move TASK-0001 in-progress"),
            Some(Command::Move { id: "TASK-0001".into(), status: "in-progress".into() })
        );
        assert_eq!(
            parse("/note 3 remember the  edge case"),
            Some(Command::Note { id: "3".into(), text: "remember the  edge case".into() })
        );
        assert_eq!(
            parse("/new Add login\nwith OAuth"),
            Some(Command::New("Add login\nwith OAuth".into()))
        );
        assert_eq!(parse("/list"), Some(Command::List(None)));
        assert_eq!(parse("/list blocked"), Some(Command::List(Some("blocked".into()))));
    }

    #[test]
    fn bot_suffix_and_case_are_ignored() {
        assert_eq!(parse("/Standup@pm_team_bot"), Some(Command::Standup));
        assert_eq!(parse("/ASK QA 4"), Some(Command::Ask { role: "qa".into(), id: "4".into() }));
    }

    #[test]
    fn missing_arguments_give_usage() {
        assert_eq!(parse("/move 1"), Some(Command::Usage("/move <id> <status>")));
        assert_eq!(parse("/note 1"), Some(Command::Usage("/note <id> <text>")));
        assert_eq!(parse("/new"), Some(Command::Usage("/new <text>")));
        assert_eq!(parse("/frobnicate"), Some(Command::Unknown("frobnicate".into())));
    }
}
