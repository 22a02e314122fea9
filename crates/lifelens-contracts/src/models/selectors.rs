use super::registry::{ProviderCatalog, ProviderRole, ProviderSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub spec: ProviderSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSelector {
    pub catalog: ProviderCatalog,
}

impl ProviderSelector {
    pub fn new(catalog: Option<ProviderCatalog>) -> Self {
        Self {
            catalog: catalog.unwrap_or_else(|| ProviderCatalog::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        role: ProviderRole,
    ) -> Result<ProviderSelection, String> {
        let role_name = role.as_str();
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(spec) = self.catalog.ensure(requested_value, role) {
                return Ok(ProviderSelection {
                    spec,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested provider '{requested_value}' unavailable for role '{role_name}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No provider specified; using default.".to_string()), None)
        };

        let candidates = self.catalog.by_role(role);
        let Some(spec) = candidates.first().cloned() else {
            return Err(format!("No providers available for role '{role_name}'."));
        };
        Ok(ProviderSelection {
            spec,
            requested: requested_text,
            fallback_reason,
        })
    }
}
