// Prompt templates for the workflow protocol
//
// Planning, subtask and assembly instructions sent to the planner and
// worker agents. Templates are versioned so stored task prompts can be
// traced back to the wording that produced them.

use std::collections::HashMap;

use crate::domain::workflow::WorkerProfile;

/// System prompt of the shared planner agent
pub const PLANNER_SYSTEM_PROMPT: &str = "You are the planner of a team of AI agents. \
     You break goals into ordered steps for specialist workers and combine \
     their results into one final answer. You never do the work yourself.";

/// Prompt template structure
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the user template with variables
    ///
    /// Every `{{name}}` with a matching variable is substituted in a single
    /// pass, so substituted values are never expanded again. Placeholders
    /// without a variable are left as they are.
    pub fn render(&self, variables: &HashMap<&str, String>) -> String {
        let template = self.user_template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let key = after[..close].trim();
                    match variables.get(key) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[open..open + 2 + close + 2]),
                    }
                    rest = &after[close + 2..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

pub mod library {
    use super::PromptTemplate;

    pub fn planning() -> PromptTemplate {
        PromptTemplate {
            name: "planning".to_string(),
            version: "1.0.0".to_string(),
            user_template: "Break the following goal into at most {{max_steps}} ordered steps.\n\n\
                            Goal: {{goal}}\n\n\
                            Each step is run by one specialist worker, strictly in order, and may \
                            rely on files produced by earlier steps.\n\
                            Available worker profiles: {{profiles}}\n\n\
                            Answer with one line per step and nothing else on those lines, \
                            exactly in this form:\n\
                            1. [profile] what the worker must do\n\
                            2. [profile] what the worker must do\n\n\
                            Number the steps 1, 2, 3 without gaps."
                .to_string(),
        }
    }

    pub fn subtask() -> PromptTemplate {
        PromptTemplate {
            name: "subtask".to_string(),
            version: "1.0.0".to_string(),
            user_template: "You are working on step {{index}} of {{total}} of a larger goal.\n\n\
                            Overall goal: {{goal}}\n\n\
                            Results of the previous steps:\n{{previous}}\n\n\
                            Your step: {{description}}"
                .to_string(),
        }
    }

    pub fn assembly() -> PromptTemplate {
        PromptTemplate {
            name: "assembly".to_string(),
            version: "1.0.0".to_string(),
            user_template: "All steps for the following goal have finished.\n\n\
                            Goal: {{goal}}\n\n\
                            Step results:\n{{results}}\n\n\
                            Combine them into one final answer for the person who set the goal."
                .to_string(),
        }
    }
}

const MAX_CONTEXT_CHARS: usize = 2_000;

/// Planning instruction for a goal
pub fn planning_prompt(goal: &str, max_steps: usize) -> String {
    let profiles = WorkerProfile::ALL
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut vars = HashMap::new();
    vars.insert("goal", goal.to_string());
    vars.insert("max_steps", max_steps.to_string());
    vars.insert("profiles", profiles);
    library::planning().render(&vars)
}

/// Prompt of one subtask, carrying the results of the steps before it
///
/// `index` is zero-based; the prompt numbers steps from 1.
pub fn subtask_prompt(
    goal: &str,
    index: u32,
    total: usize,
    description: &str,
    previous: &[(u32, String)],
) -> String {
    let previous = if previous.is_empty() {
        "(none)".to_string()
    } else {
        format_results(previous)
    };

    let mut vars = HashMap::new();
    vars.insert("index", (index + 1).to_string());
    vars.insert("total", total.to_string());
    vars.insert("goal", goal.to_string());
    vars.insert("description", description.to_string());
    vars.insert("previous", previous);
    library::subtask().render(&vars)
}

/// Assembly instruction over every subtask result
pub fn assembly_prompt(goal: &str, results: &[(u32, String)]) -> String {
    let mut vars = HashMap::new();
    vars.insert("goal", goal.to_string());
    vars.insert("results", format_results(results));
    library::assembly().render(&vars)
}

fn format_results(results: &[(u32, String)]) -> String {
    results
        .iter()
        .map(|(index, text)| format!("Step {}:\n{}", index + 1, clip(text)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn clip(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
