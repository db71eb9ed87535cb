//! Resource Registry Setup
//!
//! Creates the resource registry the agent audits with.

use policy_kit::log_debug;
use policy_kit::resources::registry::DuplicateResource;
use policy_kit::resources::{create_default_registry, ResourceRegistry};

/// Create a registry with every bundled resource
///
/// Includes:
/// - Platform facts, command output and file metadata
/// - Linux kernel modules
/// - Process and hosts-file tables
/// - JSON documents and policy statements
/// - Windows security policy
pub fn create_agent_registry() -> Result<ResourceRegistry, DuplicateResource> {
    let registry = create_default_registry()?;
    log_debug!("Resource registry initialized", "resources" => registry.names().join(","));
    Ok(registry)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_registry_has_bundled_resources() {
        let registry = create_agent_registry().unwrap();
        for name in ["os", "file", "command", "etc_hosts", "policy_document"] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }
}
