//! Registry of target services supported by samay.
//!
//! Descriptors can be defined in two places:
//!   1. Built-in defaults compiled into the binary so samay works
//!      out-of-the-box against the four stock services.
//!   2. Override entries inside `$SAMAY_HOME/config.toml` under the
//!      `services` key, so modest UI drift (a renamed selector, a slower
//!      service) is a config edit rather than a code change.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::SamayErr;

/// Priority-ordered selector lists for the page elements a service module
/// touches. Fallbacks are tried in order when the primary is missing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct SelectorSet {
    pub input: Vec<String>,
    pub send_button: Vec<String>,
    pub response_container: Vec<String>,
    #[serde(default)]
    pub loading_indicator: Vec<String>,
    /// Node that holds source links for research-style replies.
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Strategy for deciding that a service has finished producing a reply.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum CompletionHeuristic {
    /// Complete once no DOM mutations have hit the response container for
    /// a quiet window after the first mutation.
    StableDom {
        #[serde(default = "default_quiet_window_ms")]
        quiet_window_ms: u64,
    },
    /// Complete once the loading indicator is gone and the container has
    /// non-empty text.
    SpinnerAbsent,
    /// Complete once a citations/sources node appears under the response
    /// container.
    SourceCitation,
    /// Complete once a sentinel attribute flips to its done value, or the
    /// send control reappears enabled.
    StreamingDone {
        #[serde(default = "default_sentinel_attr")]
        sentinel_attr: String,
        #[serde(default = "default_sentinel_done")]
        done_value: String,
    },
}

fn default_quiet_window_ms() -> u64 {
    1_500
}

fn default_sentinel_attr() -> String {
    "data-message-state".to_string()
}

fn default_sentinel_done() -> String {
    "done".to_string()
}

/// Immutable configuration record for one target service. Loaded once at
/// startup; never mutated at runtime.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceDescriptor {
    pub id: String,
    pub display_name: String,
    /// Wildcard pattern a tab URL must match to count as this service.
    pub origin_pattern: String,
    pub launch_url: String,
    pub selectors: SelectorSet,
    pub typing_chars_per_second: u32,
    pub injection_settle_ms: u64,
    pub per_service_timeout_ms: u64,
    pub completion_heuristic: CompletionHeuristic,
}

impl ServiceDescriptor {
    pub fn per_service_timeout(&self) -> Duration {
        Duration::from_millis(self.per_service_timeout_ms)
    }

    pub fn injection_settle(&self) -> Duration {
        Duration::from_millis(self.injection_settle_ms)
    }
}

/// Partial descriptor loaded from config; `None` fields keep the built-in
/// value.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ServiceDescriptorOverride {
    pub launch_url: Option<String>,
    pub selectors: Option<SelectorSet>,
    pub typing_chars_per_second: Option<u32>,
    pub injection_settle_ms: Option<u64>,
    pub per_service_timeout_ms: Option<u64>,
    pub completion_heuristic: Option<CompletionHeuristic>,
}

impl ServiceDescriptorOverride {
    fn apply(&self, descriptor: &mut ServiceDescriptor) {
        if let Some(launch_url) = &self.launch_url {
            descriptor.launch_url = launch_url.clone();
        }
        if let Some(selectors) = &self.selectors {
            descriptor.selectors = selectors.clone();
        }
        if let Some(cps) = self.typing_chars_per_second {
            descriptor.typing_chars_per_second = cps;
        }
        if let Some(settle) = self.injection_settle_ms {
            descriptor.injection_settle_ms = settle;
        }
        if let Some(timeout) = self.per_service_timeout_ms {
            descriptor.per_service_timeout_ms = timeout;
        }
        if let Some(heuristic) = &self.completion_heuristic {
            descriptor.completion_heuristic = heuristic.clone();
        }
    }
}

fn selectors(
    input: &[&str],
    send_button: &[&str],
    response_container: &[&str],
    loading_indicator: &[&str],
    citations: &[&str],
) -> SelectorSet {
    let own = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
    SelectorSet {
        input: own(input),
        send_button: own(send_button),
        response_container: own(response_container),
        loading_indicator: own(loading_indicator),
        citations: own(citations),
    }
}

/// Built-in default descriptor list.
pub fn built_in_service_descriptors() -> HashMap<String, ServiceDescriptor> {
    use ServiceDescriptor as D;

    [
        (
            "chatgpt",
            D {
                id: "chatgpt".into(),
                display_name: "ChatGPT".into(),
                origin_pattern: "https://chatgpt.com/*".into(),
                launch_url: "https://chatgpt.com/".into(),
                selectors: selectors(
                    &["#prompt-textarea", "div.ProseMirror[contenteditable='true']"],
                    &[
                        "button[data-testid='send-button']",
                        "button[aria-label='Send prompt']",
                    ],
                    &["div[data-message-author-role='assistant']"],
                    &["button[data-testid='stop-button']"],
                    &[],
                ),
                typing_chars_per_second: 45,
                injection_settle_ms: 400,
                per_service_timeout_ms: 120_000,
                completion_heuristic: CompletionHeuristic::StreamingDone {
                    sentinel_attr: "data-message-state".into(),
                    done_value: "done".into(),
                },
            },
        ),
        (
            "claude",
            D {
                id: "claude".into(),
                display_name: "Claude".into(),
                origin_pattern: "https://claude.ai/*".into(),
                launch_url: "https://claude.ai/new".into(),
                selectors: selectors(
                    &[
                        "div[contenteditable='true'].ProseMirror",
                        "div[contenteditable='true']",
                    ],
                    &[
                        "button[aria-label='Send message']",
                        "button[aria-label='Send Message']",
                    ],
                    &[
                        "div[data-testid='chat-message-content']",
                        "div.font-claude-message",
                    ],
                    &["div[data-is-streaming='true']"],
                    &[],
                ),
                typing_chars_per_second: 40,
                injection_settle_ms: 500,
                per_service_timeout_ms: 120_000,
                completion_heuristic: CompletionHeuristic::StableDom {
                    quiet_window_ms: 1_500,
                },
            },
        ),
        (
            "gemini",
            D {
                id: "gemini".into(),
                display_name: "Gemini".into(),
                origin_pattern: "https://gemini.google.com/*".into(),
                launch_url: "https://gemini.google.com/app".into(),
                selectors: selectors(
                    &["rich-textarea div[contenteditable='true']", "div.ql-editor"],
                    &["button[aria-label='Send message']", "button.send-button"],
                    &["message-content", "div.model-response-text"],
                    &["div.loading-indicator", "mat-spinner"],
                    &[],
                ),
                typing_chars_per_second: 50,
                injection_settle_ms: 300,
                per_service_timeout_ms: 90_000,
                completion_heuristic: CompletionHeuristic::SpinnerAbsent,
            },
        ),
        (
            "perplexity",
            D {
                id: "perplexity".into(),
                display_name: "Perplexity".into(),
                origin_pattern: "https://www.perplexity.ai/*".into(),
                launch_url: "https://www.perplexity.ai/".into(),
                selectors: selectors(
                    &["textarea[placeholder*='Ask']", "textarea"],
                    &["button[aria-label='Submit']", "button[type='submit']"],
                    &["div.prose", "div[class*='answer']"],
                    &["svg.animate-spin"],
                    &["div.citations", "a[class*='citation']"],
                ),
                typing_chars_per_second: 55,
                injection_settle_ms: 250,
                per_service_timeout_ms: 90_000,
                completion_heuristic: CompletionHeuristic::SourceCitation,
            },
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Read-only descriptor table keyed by service id.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    descriptors: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn built_in() -> Self {
        Self {
            descriptors: built_in_service_descriptors(),
        }
    }

    /// Built-ins with config overrides applied. Overrides for unknown ids
    /// are ignored (there is no module to drive them).
    pub fn with_overrides(overrides: &HashMap<String, ServiceDescriptorOverride>) -> Self {
        let mut registry = Self::built_in();
        for (id, patch) in overrides {
            if let Some(descriptor) = registry.descriptors.get_mut(id) {
                patch.apply(descriptor);
            } else {
                tracing::warn!("ignoring override for unknown service `{id}`");
            }
        }
        registry
    }

    /// Registry with exactly the given descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&ServiceDescriptor> {
        self.descriptors
            .get(id)
            .ok_or_else(|| SamayErr::DescriptorNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn built_ins_cover_the_four_services() {
        let registry = ServiceRegistry::built_in();
        for id in ["chatgpt", "claude", "gemini", "perplexity"] {
            let descriptor = registry.get(id).expect("descriptor");
            assert_eq!(descriptor.id, id);
            assert!(
                !descriptor.selectors.input.is_empty(),
                "{id} needs at least one input selector"
            );
            assert!(!descriptor.selectors.response_container.is_empty());
        }
        assert!(registry.get("copilot").is_err());
    }

    #[test]
    fn overrides_patch_only_named_fields() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude".to_string(),
            ServiceDescriptorOverride {
                per_service_timeout_ms: Some(5_000),
                ..Default::default()
            },
        );
        let registry = ServiceRegistry::with_overrides(&overrides);
        let claude = registry.get("claude").expect("descriptor");
        assert_eq!(claude.per_service_timeout_ms, 5_000);
        // Untouched fields keep built-in values.
        assert_eq!(claude.typing_chars_per_second, 40);
    }

    #[test]
    fn heuristic_wire_form() {
        let heuristic = CompletionHeuristic::StableDom {
            quiet_window_ms: 1_500,
        };
        let toml = toml::to_string(&heuristic).expect("serialize");
        assert!(toml.contains("strategy = \"stable-dom\""), "got: {toml}");

        let parsed: CompletionHeuristic =
            toml::from_str("strategy = \"spinner-absent\"").expect("parse");
        assert_eq!(parsed, CompletionHeuristic::SpinnerAbsent);
    }
}
