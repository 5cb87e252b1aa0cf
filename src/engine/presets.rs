// Ready-made agent definitions
//
// Seeded on request so a fresh installation has something to talk to.

use crate::domain::agent::{AgentSpec, Capability};

fn preset(
    id: &str,
    name: &str,
    description: &str,
    system_prompt: &str,
    capabilities: &[Capability],
) -> AgentSpec {
    let mut spec = AgentSpec::new(name, system_prompt);
    spec.id = Some(id.to_string());
    spec.description = Some(description.to_string());
    spec.capabilities = Some(capabilities.iter().map(|c| c.as_str().to_string()).collect());
    spec
}

/// The echo, coder and reviewer agents
pub fn preset_specs() -> Vec<AgentSpec> {
    vec![
        preset(
            "echo",
            "Echo Agent",
            "Simple agent that responds to prompts",
            "You are a helpful assistant. Respond concisely.",
            &[],
        ),
        preset(
            "coder",
            "Coding Agent",
            "Agent that can read, write, and edit code",
            "You are an expert programmer. Read files, write code, run tests.",
            &[
                Capability::Read,
                Capability::Write,
                Capability::Edit,
                Capability::Bash,
                Capability::Glob,
                Capability::Grep,
            ],
        ),
        preset(
            "reviewer",
            "Code Reviewer",
            "Reviews code for bugs, style, and security issues",
            "You are a senior code reviewer. Read code and provide detailed reviews.",
            &[Capability::Read, Capability::Glob, Capability::Grep],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentConfig;

    #[test]
    fn presets_are_valid_configurations() {
        let configs: Vec<AgentConfig> = preset_specs()
            .into_iter()
            .map(|spec| AgentConfig::from_spec(spec).unwrap())
            .collect();

        let ids: Vec<&str> = configs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["echo", "coder", "reviewer"]);
        assert!(configs[0].capabilities.is_empty());
        assert_eq!(configs[1].capability_list(), "Read,Write,Edit,Bash,Glob,Grep");
        assert_eq!(configs[2].capability_list(), "Read,Glob,Grep");
    }
}
