//! Tool implementations for agentloop.
//!
//! Every tool a profile declares is an external program ([`CommandTool`]).
//! Tools marked `shared` run once per turn no matter how many times the model
//! invoked them ([`SharedTool`]).

pub mod command;
pub mod shared;

pub use command::CommandTool;
pub use shared::SharedTool;

use agentloop_config::ProfileConfig;
use agentloop_core::tool::{CompletionTool, Tool, ToolRegistry};
use std::sync::Arc;

/// Build the tool registry for a profile.
///
/// Tools are registered in declaration order; the completion tool, when the
/// profile declares one, is described last.
pub fn registry_from_profile(profile: &ProfileConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    for config in &profile.tools {
        let tool: Arc<dyn Tool> = Arc::new(CommandTool::from_config(config));
        if config.shared {
            registry.register(Arc::new(SharedTool::new(tool)));
        } else {
            registry.register(tool);
        }
    }

    match &profile.completion {
        Some(c) => {
            let mut completion = CompletionTool::new(&c.name, &c.description, &c.answer_field);
            if let Some(description) = &c.answer_description {
                completion = completion.with_answer_description(description);
            }
            registry.with_completion(completion)
        }
        None => registry,
    }
}
