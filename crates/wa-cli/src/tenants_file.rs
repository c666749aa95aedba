use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use wa_session::{validate_tenant_id, TenantConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One entry of the `--tenants-file` JSON array.
pub struct TenantSeed {
    pub tenant_id: String,
    #[serde(flatten)]
    pub config: TenantConfig,
}

/// Loads and validates the startup tenant list.
///
/// Tenant ids must be valid store names and unique; every tenant needs an
/// assistant id. An empty array is accepted.
pub fn load_tenants_file(path: &Path) -> Result<Vec<TenantSeed>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tenants file {}", path.display()))?;
    let seeds = serde_json::from_str::<Vec<TenantSeed>>(&raw)
        .with_context(|| format!("failed to parse tenants file {}", path.display()))?;

    let mut seen = BTreeSet::new();
    for (index, seed) in seeds.iter().enumerate() {
        let tenant_id = seed.tenant_id.trim();
        validate_tenant_id(tenant_id)
            .with_context(|| format!("tenants file entry {index} has an invalid tenantId"))?;
        if seed.config.assistant_id.trim().is_empty() {
            bail!("tenants file entry {index} ('{tenant_id}') is missing assistantId");
        }
        if !seen.insert(tenant_id.to_string()) {
            bail!("tenants file lists tenant '{tenant_id}' more than once");
        }
    }
    Ok(seeds
        .into_iter()
        .map(|seed| TenantSeed {
            tenant_id: seed.tenant_id.trim().to_string(),
            config: seed.config,
        })
        .collect())
}
