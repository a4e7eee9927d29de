//! Agent manifest loading.
//!
//! The CLI seeds its in-process registry from a YAML manifest. Manifest
//! entries are an explicit document shape parsed into typed descriptors;
//! unknown required fields fail the load rather than flowing through.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use cadenza_core::store::AgentRegistry;
use cadenza_core::types::{AgentCategory, AgentDescriptor, PricingPolicy};

#[derive(Debug, Deserialize)]
pub struct AgentManifest {
    pub agents: Vec<ManifestAgent>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestAgent {
    pub reference: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: AgentCategory,
    pub endpoint: String,
    pub owner_wallet: String,
    #[serde(default)]
    pub version: Option<String>,
    pub chains: Vec<String>,
    pub tokens: Vec<String>,
    pub pricing: PricingPolicy,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publish after creation; draft agents fail workflow validation.
    #[serde(default = "default_publish")]
    pub publish: bool,
}

fn default_publish() -> bool {
    true
}

impl AgentManifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading agent manifest {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing agent manifest {}", path.display()))
    }
}

/// Create (and optionally publish) every manifest agent.
pub async fn seed_registry(
    registry: &dyn AgentRegistry,
    manifest: &AgentManifest,
) -> anyhow::Result<usize> {
    for entry in &manifest.agents {
        let mut descriptor = AgentDescriptor::draft(
            &entry.reference,
            &entry.name,
            &entry.owner_wallet,
            entry.pricing.clone(),
        )
        .with_endpoint(&entry.endpoint)
        .with_category(entry.category);
        descriptor.description = entry.description.clone();
        if let Some(version) = &entry.version {
            descriptor.version = version.clone();
        }
        descriptor.supported_chains = entry.chains.iter().cloned().collect();
        descriptor.supported_tokens = entry.tokens.iter().cloned().collect();
        descriptor.tags = entry.tags.clone();

        registry
            .create(descriptor)
            .await
            .with_context(|| format!("registering agent '{}'", entry.reference))?;
        if entry.publish {
            registry
                .publish(&entry.reference)
                .await
                .with_context(|| format!("publishing agent '{}'", entry.reference))?;
        }
    }
    Ok(manifest.agents.len())
}
