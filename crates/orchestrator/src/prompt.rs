//! System prompt assembly.
//!
//! Builds the message list for an engine call from the classified
//! request, retrieved context, capability definitions, and the
//! window-visible conversation. Pure: same inputs, same prompt.

use forgeloop_core::capability::CapabilityDefinition;
use forgeloop_core::engine::EngineMessage;
use forgeloop_core::token::estimate_message_tokens;
use forgeloop_core::turn::{ConversationTurn, Role};

use crate::router::{ComplexityTier, TaskType};

/// Fallback identity when the config does not set a preamble.
pub const DEFAULT_IDENTITY: &str = "\
You are Forgeloop, an autonomous coding assistant with full filesystem access.
You work locally in the user's workspace with control over files, git, and shell commands.";

const TOOL_FORMAT: &str = r#"## Tool Usage Format

When you need to use a tool, output it in this exact format:
```
<invoke name="tool_name">
<param name="param_name">value</param>
</invoke>
```

You can use multiple tools in a single response. Execute all independent operations together."#;

const EFFICIENCY_RULES: &str = "\
## Efficiency Rules
1. **NEVER read the same file twice** - Results are cached within iterations
2. **Read before editing** - ALWAYS use file_read before file_edit or file_write
3. **Use file_edit for edits** - More efficient than rewriting entire files
4. **List before reading** - Use dir_list to explore unknown directories
5. **Think before acting** - Plan your approach, don't trial-and-error
6. **Handle errors intelligently** - Read error recovery suggestions and follow them";

const RESPONSE_FORMAT: &str = "\
## Response Format

Structure your responses:
1. **Brief plan** (1-2 sentences of what you'll do)
2. **Tool calls** (execute your plan)
3. **Summary** (what happened, what's next)

Be concise. Avoid unnecessary explanations.";

/// Everything the builder needs besides the conversation itself.
pub struct PromptInputs<'a> {
    /// Configured identity preamble; falls back to [`DEFAULT_IDENTITY`].
    pub identity: Option<&'a str>,
    pub task_type: TaskType,
    pub tier: ComplexityTier,
    /// Pre-formatted snippet block from the retriever; empty when none.
    pub retrieved_context: &'a str,
    pub definitions: &'a [CapabilityDefinition],
    /// Pre-formatted recent-error block; empty when none.
    pub error_history: &'a str,
    pub performance_hint: &'a str,
}

/// The assembled request body plus its estimated prompt cost.
pub struct BuiltPrompt {
    pub messages: Vec<EngineMessage>,
    pub estimated_tokens: usize,
}

/// Assemble the full message list: one system message followed by the
/// window-visible conversation.
pub fn build_messages(inputs: &PromptInputs<'_>, visible: &[ConversationTurn]) -> BuiltPrompt {
    let mut messages = Vec::with_capacity(visible.len() + 1);
    messages.push(EngineMessage::system(build_system_prompt(inputs)));
    messages.extend(turn_messages(visible));

    let estimated_tokens = messages.iter().map(estimate_message_tokens).sum();
    BuiltPrompt {
        messages,
        estimated_tokens,
    }
}

/// Build the system prompt from its sections, in a fixed order.
pub fn build_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(inputs.identity.unwrap_or(DEFAULT_IDENTITY).to_string());
    sections.push(tier_hint(inputs.tier).to_string());

    if !inputs.retrieved_context.is_empty() {
        sections.push(format!(
            "{}\nUse this context to inform your approach.",
            inputs.retrieved_context.trim_end()
        ));
    }

    sections.push(guidance_for(inputs.task_type).to_string());
    sections.push(format!(
        "## Available Tools\n\n{}",
        render_definitions(inputs.definitions)
    ));
    sections.push(TOOL_FORMAT.to_string());
    sections.push(EFFICIENCY_RULES.to_string());
    sections.push(RESPONSE_FORMAT.to_string());

    if !inputs.error_history.is_empty() {
        sections.push(format!(
            "## Recent Errors to Avoid\n\n{}\nLearn from these errors and avoid repeating them.",
            inputs.error_history.trim_end()
        ));
    }

    if !inputs.performance_hint.is_empty() {
        sections.push(format!("## Performance Note\n{}", inputs.performance_hint));
    }

    sections.push("Work smart, work fast, work correct.".to_string());
    sections.join("\n\n")
}

/// Map conversation turns onto the engine wire roles. Tool output goes
/// back as a user message; summaries ride as system messages so the
/// engine treats them as ground truth rather than its own words.
pub fn turn_messages(visible: &[ConversationTurn]) -> Vec<EngineMessage> {
    visible
        .iter()
        .map(|turn| match turn.role {
            Role::User => EngineMessage::user(&turn.content),
            Role::Assistant => EngineMessage::assistant(&turn.content),
            Role::Tool => EngineMessage::user(format!("Tool results:\n{}", turn.content)),
            Role::Summary => EngineMessage::system(format!(
                "Previous conversation summary:\n{}",
                turn.content
            )),
        })
        .collect()
}

/// Render capability definitions for the tools section.
pub fn render_definitions(definitions: &[CapabilityDefinition]) -> String {
    if definitions.is_empty() {
        return "(no tools registered)".to_string();
    }

    let mut block = String::new();
    for def in definitions {
        let marker = if def.read_only { " (read-only)" } else { "" };
        block.push_str(&format!(
            "### {}{}\n{}\nParameters: {}\n\n",
            def.name, marker, def.description, def.parameters
        ));
    }
    block.truncate(block.trim_end().len());
    block
}

fn tier_hint(tier: ComplexityTier) -> &'static str {
    match tier {
        ComplexityTier::Low => {
            "## Note: Operating in fast mode\n\
             - Focus on simple, direct solutions\n\
             - Minimize complex reasoning chains\n\
             - Prefer established patterns over novel approaches"
        }
        ComplexityTier::Medium => {
            "## Note: Standard mode\n\
             - Balance thoroughness with efficiency\n\
             - Use appropriate level of detail\n\
             - Consider multiple approaches when relevant"
        }
        ComplexityTier::High => {
            "## Note: Advanced reasoning mode\n\
             - Take time for complex analysis\n\
             - Consider architecture and design implications\n\
             - Explore edge cases thoroughly\n\
             - Think about long-term maintainability"
        }
    }
}

fn guidance_for(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Implement => {
            "## Implementation Guidelines\n\
             - Write clean, well-structured code following existing patterns\n\
             - Add appropriate error handling\n\
             - Consider edge cases\n\
             - Use meaningful variable and function names\n\
             - Keep functions focused and small"
        }
        TaskType::Debug => {
            "## Debugging Guidelines\n\
             - First, understand the error completely before fixing\n\
             - Read relevant code to understand context\n\
             - Form a hypothesis about the root cause\n\
             - Make minimal, targeted fixes\n\
             - Verify the fix doesn't break other functionality"
        }
        TaskType::Refactor => {
            "## Refactoring Guidelines\n\
             - Preserve existing functionality - no behavior changes\n\
             - Make incremental improvements\n\
             - Consider backwards compatibility\n\
             - Run tests after changes if available"
        }
        TaskType::Explain => {
            "## Explanation Guidelines\n\
             - Be clear and concise\n\
             - Use examples when helpful\n\
             - Explain the \"why\" not just the \"what\"\n\
             - Reference specific code locations\n\
             - Adjust detail level to the question"
        }
        TaskType::Review => {
            "## Code Review Guidelines\n\
             - Read the code under review before judging it\n\
             - Check for common issues: bugs, security, performance\n\
             - Suggest specific, actionable improvements\n\
             - Prioritize critical issues first\n\
             - Be constructive, not just critical"
        }
        TaskType::Test => {
            "## Testing Guidelines\n\
             - Cover happy paths and edge cases\n\
             - Test error conditions\n\
             - Keep tests focused and independent\n\
             - Use descriptive test names"
        }
        TaskType::Document => {
            "## Documentation Guidelines\n\
             - Be clear and concise\n\
             - Use proper formatting (markdown)\n\
             - Include code examples where helpful\n\
             - Document the \"why\" not just the \"how\"\n\
             - Keep documentation close to the code"
        }
        TaskType::Explore => {
            "## Exploration Guidelines\n\
             - Use dir_list to understand structure\n\
             - Use code_search to find relevant patterns\n\
             - Read key files to understand architecture\n\
             - Map dependencies and relationships\n\
             - Summarize findings clearly"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs<'a>(definitions: &'a [CapabilityDefinition]) -> PromptInputs<'a> {
        PromptInputs {
            identity: None,
            task_type: TaskType::Explore,
            tier: ComplexityTier::Medium,
            retrieved_context: "",
            definitions,
            error_history: "",
            performance_hint: "",
        }
    }

    fn sample_definition() -> CapabilityDefinition {
        CapabilityDefinition {
            name: "file_read".to_string(),
            description: "Read a file from the workspace.".to_string(),
            parameters: json!({"properties": {"path": {"type": "string"}}, "required": ["path"]}),
            read_only: true,
        }
    }

    #[test]
    fn default_identity_leads_the_prompt() {
        let defs = vec![sample_definition()];
        let prompt = build_system_prompt(&inputs(&defs));
        assert!(prompt.starts_with("You are Forgeloop"));
        assert!(prompt.ends_with("Work smart, work fast, work correct."));
    }

    #[test]
    fn configured_identity_replaces_the_default() {
        let defs = vec![sample_definition()];
        let mut i = inputs(&defs);
        i.identity = Some("You are a careful release engineer.");
        let prompt = build_system_prompt(&i);
        assert!(prompt.starts_with("You are a careful release engineer."));
        assert!(!prompt.contains("You are Forgeloop"));
    }

    #[test]
    fn guidance_tracks_the_task_type() {
        let defs = vec![sample_definition()];
        let mut i = inputs(&defs);

        i.task_type = TaskType::Debug;
        assert!(build_system_prompt(&i).contains("## Debugging Guidelines"));

        i.task_type = TaskType::Implement;
        let prompt = build_system_prompt(&i);
        assert!(prompt.contains("## Implementation Guidelines"));
        assert!(!prompt.contains("## Debugging Guidelines"));
    }

    #[test]
    fn tier_hint_tracks_the_tier() {
        let defs = vec![sample_definition()];
        let mut i = inputs(&defs);

        i.tier = ComplexityTier::Low;
        assert!(build_system_prompt(&i).contains("fast mode"));

        i.tier = ComplexityTier::High;
        assert!(build_system_prompt(&i).contains("Advanced reasoning mode"));
    }

    #[test]
    fn retrieved_context_is_optional() {
        let defs = vec![sample_definition()];
        let mut i = inputs(&defs);
        assert!(!build_system_prompt(&i).contains("Use this context"));

        i.retrieved_context = "Relevant context:\n\n[workspace] fn main() {}\n";
        let prompt = build_system_prompt(&i);
        assert!(prompt.contains("[workspace] fn main() {}"));
        assert!(prompt.contains("Use this context to inform your approach."));
    }

    #[test]
    fn error_history_is_optional() {
        let defs = vec![sample_definition()];
        let mut i = inputs(&defs);
        assert!(!build_system_prompt(&i).contains("Recent Errors"));

        i.error_history = "- file_read failed: not_found";
        let prompt = build_system_prompt(&i);
        assert!(prompt.contains("## Recent Errors to Avoid"));
        assert!(prompt.contains("file_read failed: not_found"));
        assert!(prompt.contains("Learn from these errors"));
    }

    #[test]
    fn tool_section_lists_definitions_and_format() {
        let defs = vec![sample_definition()];
        let prompt = build_system_prompt(&inputs(&defs));
        assert!(prompt.contains("## Available Tools"));
        assert!(prompt.contains("### file_read (read-only)"));
        assert!(prompt.contains("Read a file from the workspace."));
        assert!(prompt.contains("<invoke name=\"tool_name\">"));
        assert!(prompt.contains("</invoke>"));
    }

    #[test]
    fn empty_registry_still_renders() {
        assert_eq!(render_definitions(&[]), "(no tools registered)");
    }

    #[test]
    fn turns_map_onto_wire_roles() {
        use forgeloop_core::engine::EngineRole;

        let visible = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant("hi"),
            ConversationTurn::tool("search output", Vec::new()),
            ConversationTurn::summary("we discussed the parser"),
        ];
        let messages = turn_messages(&visible);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, EngineRole::User);
        assert_eq!(messages[1].role, EngineRole::Assistant);
        assert_eq!(messages[2].role, EngineRole::User);
        assert!(messages[2].content.starts_with("Tool results:\n"));
        assert_eq!(messages[3].role, EngineRole::System);
        assert!(messages[3].content.contains("we discussed the parser"));
    }

    #[test]
    fn built_prompt_counts_tokens() {
        let defs = vec![sample_definition()];
        let visible = vec![ConversationTurn::user("explain the build script")];
        let built = build_messages(&inputs(&defs), &visible);

        assert_eq!(built.messages.len(), 2);
        assert!(built.estimated_tokens > 0);
        let recount: usize = built.messages.iter().map(estimate_message_tokens).sum();
        assert_eq!(built.estimated_tokens, recount);
    }

    #[test]
    fn same_inputs_same_prompt() {
        let defs = vec![sample_definition()];
        let a = build_system_prompt(&inputs(&defs));
        let b = build_system_prompt(&inputs(&defs));
        assert_eq!(a, b);
    }
}
