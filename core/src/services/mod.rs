//! Per-service automation modules and the runtime dispatch map.
//!
//! Each target service gets a `(Injector, Extractor)` pair selected by
//! service id. The pairs reuse the descriptor-driven generic logic and
//! layer that page's quirks on top, so selector drift stays a descriptor
//! edit and only genuinely structural differences live in code.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extract::Extractor;
use crate::extract::HeuristicExtractor;
use crate::inject::DomInjector;
use crate::inject::Injector;

pub mod chatgpt;
pub mod claude;
pub mod gemini;
pub mod perplexity;

/// The module pair driven inside one service's tab.
#[derive(Clone)]
pub struct ServiceAutomation {
    pub injector: Arc<dyn Injector>,
    pub extractor: Arc<dyn Extractor>,
}

impl ServiceAutomation {
    /// Purely descriptor-driven pair, used for config-registered services
    /// without a dedicated module.
    pub fn generic() -> Self {
        Self {
            injector: Arc::new(DomInjector),
            extractor: Arc::new(HeuristicExtractor),
        }
    }
}

/// Service id -> automation module pair.
pub struct AutomationSet {
    modules: HashMap<String, ServiceAutomation>,
}

impl AutomationSet {
    pub fn built_in() -> Self {
        let mut modules = HashMap::new();
        modules.insert(
            "chatgpt".to_string(),
            ServiceAutomation {
                injector: Arc::new(chatgpt::ChatGptInjector),
                extractor: Arc::new(chatgpt::ChatGptExtractor),
            },
        );
        modules.insert(
            "claude".to_string(),
            ServiceAutomation {
                injector: Arc::new(claude::ClaudeInjector),
                extractor: Arc::new(claude::ClaudeExtractor),
            },
        );
        modules.insert(
            "gemini".to_string(),
            ServiceAutomation {
                injector: Arc::new(gemini::GeminiInjector),
                extractor: Arc::new(gemini::GeminiExtractor),
            },
        );
        modules.insert(
            "perplexity".to_string(),
            ServiceAutomation {
                injector: Arc::new(perplexity::PerplexityInjector),
                extractor: Arc::new(perplexity::PerplexityExtractor),
            },
        );
        Self { modules }
    }

    /// The generic pair for every listed id. Test harnesses use this to
    /// pair synthetic descriptors with scripted pages.
    pub fn generic_for<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: ids
                .into_iter()
                .map(|id| (id.into(), ServiceAutomation::generic()))
                .collect(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, automation: ServiceAutomation) {
        self.modules.insert(id.into(), automation);
    }

    /// The module pair for a service, falling back to the generic pair so
    /// a descriptor-only service still runs.
    pub fn resolve(&self, id: &str) -> ServiceAutomation {
        self.modules
            .get(id)
            .cloned()
            .unwrap_or_else(ServiceAutomation::generic)
    }
}
