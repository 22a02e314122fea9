use indexmap::IndexMap;

use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Vision,
    Reasoning,
}

impl ProviderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Reasoning => "reasoning",
        }
    }
}

/// Relative price of one call. The waterfall walks vision providers from the
/// most capable (and expensive) down to local computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CostClass {
    Premium,
    Standard,
    Free,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub role: ProviderRole,
    pub cost: CostClass,
    pub min_tier: Tier,
    pub default_model: Option<String>,
}

impl ProviderSpec {
    pub fn serves(&self, role: ProviderRole) -> bool {
        self.role == role
    }

    pub fn unlocked_for(&self, tier: Tier) -> bool {
        tier >= self.min_tier
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: IndexMap<String, ProviderSpec>,
}

impl ProviderCatalog {
    pub fn new(providers: Option<IndexMap<String, ProviderSpec>>) -> Self {
        Self {
            providers: providers.unwrap_or_else(default_providers),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.providers.values()
    }

    pub fn by_role(&self, role: ProviderRole) -> Vec<ProviderSpec> {
        self.providers
            .values()
            .filter(|spec| spec.serves(role))
            .cloned()
            .collect()
    }

    /// Vision providers in waterfall order: cost class first, catalog order
    /// within a class.
    pub fn vision_order(&self) -> Vec<ProviderSpec> {
        let mut specs = self.by_role(ProviderRole::Vision);
        specs.sort_by_key(|spec| spec.cost);
        specs
    }

    pub fn ensure(&self, name: &str, role: ProviderRole) -> Option<ProviderSpec> {
        let spec = self.get(name)?;
        if spec.serves(role) {
            return Some(spec.clone());
        }
        None
    }
}

fn default_providers() -> IndexMap<String, ProviderSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      role: ProviderRole,
                      cost: CostClass,
                      min_tier: Tier,
                      default_model: Option<&str>| {
        map.insert(
            name.to_string(),
            ProviderSpec {
                name: name.to_string(),
                role,
                cost,
                min_tier,
                default_model: default_model.map(str::to_string),
            },
        );
    };

    insert(
        "openai-vision",
        ProviderRole::Vision,
        CostClass::Premium,
        Tier::Free,
        Some("gpt-4o-mini"),
    );
    insert(
        "gemini-vision",
        ProviderRole::Vision,
        CostClass::Standard,
        Tier::Premium,
        Some("gemini-2.0-flash"),
    );
    insert(
        "huggingface-vision",
        ProviderRole::Vision,
        CostClass::Free,
        Tier::Free,
        Some("Salesforce/blip-image-captioning-large"),
    );
    insert(
        "heuristic",
        ProviderRole::Vision,
        CostClass::Local,
        Tier::Free,
        None,
    );
    insert(
        "gpt-4o-mini",
        ProviderRole::Reasoning,
        CostClass::Premium,
        Tier::Free,
        Some("gpt-4o-mini"),
    );
    insert(
        "gpt-4o",
        ProviderRole::Reasoning,
        CostClass::Premium,
        Tier::Free,
        Some("gpt-4o"),
    );
    insert(
        "gpt-4.1-mini",
        ProviderRole::Reasoning,
        CostClass::Premium,
        Tier::Free,
        Some("gpt-4.1-mini"),
    );

    map
}
