//! Specialist agents — one per team role.
//!
//! A specialist has a single job: read a task, ask the LLM for notes from its
//! role's point of view and append them to the task under
//! `## Notes (<role>)`.

use std::fmt;

use tracing::info;

use super::AgentsState;
use super::prompt::preamble;
use crate::error::AppError;

const SPECIALIST_FALLBACK: &str = "\
You are the team's {{role}} specialist. Your focus: {{focus}}.
Read the task below and write short, concrete notes from your role's point
of view: risks, open questions, and the first steps you would take.
Reply in plain markdown, no more than ten bullet points.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Architect,
    Backend,
    Frontend,
    Qa,
    Devops,
    Rnd,
}

impl Role {
    pub const ALL: [Role; 6] = [Role::Architect, Role::Backend, Role::Frontend, Role::Qa, Role::Devops, Role::Rnd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Backend => "backend",
            Role::Frontend => "frontend",
            Role::Qa => "qa",
            Role::Devops => "devops",
            Role::Rnd => "rnd",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "architect" | "architecture" => Some(Role::Architect),
            "backend" | "be" => Some(Role::Backend),
            "frontend" | "fe" => Some(Role::Frontend),
            "qa" | "test" | "tester" => Some(Role::Qa),
            "devops" | "ops" => Some(Role::Devops),
            "rnd" | "r&d" | "research" => Some(Role::Rnd),
            _ => None,
        }
    }

    /// One-line focus used when no role prompt is on disk.
    pub fn focus(&self) -> &'static str {
        match self {
            Role::Architect => "system boundaries, data flow, interfaces and long-term maintainability",
            Role::Backend => "APIs, storage, error handling and server-side performance",
            Role::Frontend => "user flows, UI states, accessibility and client-side behaviour",
            Role::Qa => "acceptance criteria, edge cases and the tests that prove the work is done",
            Role::Devops => "build, deployment, configuration, monitoring and rollback",
            Role::Rnd => "prior art, unknowns worth a spike, and experiments to de-risk the work",
        }
    }

    /// Comma-separated role list for prompts and help text.
    pub fn names() -> String {
        Role::ALL.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ask `role` for notes on `task_id`, append them to the task and return the
/// chat reply.
pub async fn review(state: &AgentsState, role: Role, channel_id: &str, task_id: &str) -> Result<String, AppError> {
    let task = state.store.get(task_id)?;

    let system = preamble(&state.prompts_dir, &state.bot_name)
        .layer_or("specialist.md", SPECIALIST_FALLBACK)
        .layer(&format!("roles/{role}.md"))
        .with_vars([("role", role.as_str()), ("focus", role.focus())])
        .build();

    let mut content = format!("{}\n", task.summary_line());
    if !task.meta.depends_on.is_empty() {
        content.push_str(&format!("Depends on: {}\n", task.meta.depends_on.join(", ")));
    }
    content.push('\n');
    content.push_str(task.body.trim());

    let note = state.complete(channel_id, content, Some(system)).await?;
    let updated = state.store.append_section(task.id(), &format!("Notes ({role})"), &note)?;
    info!(task_id = %updated.id(), %role, "specialist notes appended");

    Ok(format!("{role} notes on {}:\n{note}", updated.id()))
}
