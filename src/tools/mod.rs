//! Client-side tools the agent may call during a turn.
//!
//! Each tool implements [`ToolHandler`]; a [`ToolRegistry`] routes invocations
//! by name and races them against a cancellation token. Registered tools are
//! advertised to the agent through `SessionConfig.tools`.

pub mod clock;
pub mod registry;
pub mod traits;

pub use clock::CurrentTimeTool;
pub use registry::ToolRegistry;
pub use traits::{ToolError, ToolHandler, ToolOutput};

use std::sync::Arc;

/// Create the default tool registry.
pub fn default_tools() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTimeTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tools_names() {
        let tools = default_tools();
        let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["current_time"]);
    }
}
