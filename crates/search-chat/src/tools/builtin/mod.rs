//! Built-in tools for the agent framework

mod web_search;

pub use web_search::WebSearchTool;

use super::registry::ToolRegistry;
use crate::config::Settings;
use crate::error::{AgentError, Result};

/// Create a registry with the tools enabled in `settings`
pub fn create_default_registry(settings: &Settings) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if settings.search.enabled {
        let search = WebSearchTool::new(&settings.search)
            .map_err(|e| AgentError::Configuration(format!("{:#}", e)))?;
        registry.register(search)?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_search() {
        let registry = create_default_registry(&Settings::default()).unwrap();
        assert_eq!(registry.list_names(), vec!["tavily_search"]);
    }

    #[test]
    fn test_search_can_be_disabled() {
        let mut settings = Settings::default();
        settings.search.enabled = false;
        assert!(create_default_registry(&settings).unwrap().is_empty());
    }
}
