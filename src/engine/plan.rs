//! Planner output parsing
//!
//! The planner answers with one line per step, `N. [profile] description`,
//! numbered 1, 2, 3 without gaps. Any other line is commentary.

use crate::domain::workflow::{PlanStep, WorkerProfile};

pub const MAX_PLAN_STEPS: usize = 20;

/// Parses a planner response into ordered steps
///
/// # Example
/// ```
/// use conclave_api::engine::plan::parse_plan;
///
/// let plan = parse_plan("Plan:\n1. [researcher] Survey\n2. [coder] Build").unwrap();
/// assert_eq!(plan.len(), 2);
/// assert!(parse_plan("no steps here").is_err());
/// ```
pub fn parse_plan(text: &str) -> Result<Vec<PlanStep>, String> {
    let mut steps = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        let Some((number, rest)) = step_number(line) else {
            continue;
        };

        let expected = steps.len() + 1;
        if number != expected {
            return Err(format!(
                "Step {} is out of order, expected step {}",
                number, expected
            ));
        }

        let rest = rest.trim_start();
        let Some(tagged) = rest.strip_prefix('[') else {
            return Err(format!("Step {} has no [profile] tag", number));
        };
        let Some((profile, description)) = tagged.split_once(']') else {
            return Err(format!("Step {} has an unclosed [profile] tag", number));
        };

        let profile = profile
            .parse::<WorkerProfile>()
            .map_err(|e| format!("Step {}: {}", number, e))?;
        let description = description.trim();
        if description.is_empty() {
            return Err(format!("Step {} has no description", number));
        }

        steps.push(PlanStep {
            description: description.to_string(),
            profile,
        });
        if steps.len() > MAX_PLAN_STEPS {
            return Err(format!("Plan has more than {} steps", MAX_PLAN_STEPS));
        }
    }

    if steps.is_empty() {
        return Err("Planner returned no steps".to_string());
    }
    Ok(steps)
}

/// `"12. rest"` -> `(12, " rest")`; the dot must be followed by whitespace
fn step_number(line: &str) -> Option<(usize, &str)> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let number = line[..digits].parse().ok()?;
    Some((number, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_steps_in_order() {
        let plan = parse_plan(
            "Here is the plan:\n\
             1. [researcher] Find the relevant modules\n\
             2. [Coder] Implement the change\n\
             3. [tester]   Run the suite\n\
             Good luck!",
        )
        .unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].profile, WorkerProfile::Researcher);
        assert_eq!(plan[1].profile, WorkerProfile::Coder);
        assert_eq!(plan[2].description, "Run the suite");
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(parse_plan("").is_err());
        assert!(parse_plan("I could not think of anything").is_err());
    }

    #[test]
    fn missing_profile_tag_is_rejected() {
        let err = parse_plan("1. Implement it").unwrap_err();
        assert!(err.contains("no [profile] tag"));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = parse_plan("1. [wizard] Cast spells").unwrap_err();
        assert!(err.contains("Unknown worker profile"));
    }

    #[test]
    fn gaps_in_numbering_are_rejected() {
        let err = parse_plan("1. [coder] a\n3. [coder] b").unwrap_err();
        assert!(err.contains("out of order"));
    }

    #[test]
    fn blank_description_is_rejected() {
        assert!(parse_plan("1. [writer]   ").is_err());
    }

    #[test]
    fn too_many_steps_are_rejected() {
        let text = (1..=MAX_PLAN_STEPS + 1)
            .map(|n| format!("{}. [coder] step {}", n, n))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(parse_plan(&text).is_err());
    }

    #[test]
    fn exactly_max_steps_is_accepted() {
        let text = (1..=MAX_PLAN_STEPS)
            .map(|n| format!("{}. [coder] step {}", n, n))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_plan(&text).unwrap().len(), MAX_PLAN_STEPS);
    }

    #[test]
    fn version_numbers_in_prose_are_not_steps() {
        // "2024" has no dot directly after it, "v1.2" does not start with digits
        let plan = parse_plan("In 2024 we shipped v1.2\n1. [writer] Draft notes").unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn decimals_in_prose_are_not_steps() {
        let plan = parse_plan(
            "1. [researcher] Measure pi\n\
             2. [coder] Hard-code it\n\
             3.14 is close enough",
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].description, "Hard-code it");

        // "1." alone at the end of a line is not a step either
        assert!(parse_plan("1.").is_err());
    }
}
