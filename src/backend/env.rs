//! Environment handed to the backend process

/// Selects the LLM provider ("ollama", "groq")
pub const PROVIDER_VAR: &str = "LLM_PROVIDER";

/// Variables copied from our environment into the backend's
pub const PASSTHROUGH_VARS: &[&str] = &[
    PROVIDER_VAR,
    "GROQ_API_KEY",
    "GROQ_MODEL",
    "OLLAMA_MODEL",
    "OLLAMA_URL",
];

/// Provider name that makes the backend depend on the local model service
pub const SERVICE_PROVIDER: &str = "ollama";

/// Pass-through variables as found in the process environment
pub fn backend_env(provider_override: Option<&str>) -> Vec<(String, String)> {
    assemble(|key| std::env::var(key).ok(), provider_override)
}

/// Pass-through variables as found by `lookup`
///
/// A variable that is unset or blank is left out entirely rather than
/// forwarded empty. A provider override replaces `LLM_PROVIDER`.
pub fn assemble<F>(lookup: F, provider_override: Option<&str>) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    PASSTHROUGH_VARS
        .iter()
        .filter_map(|key| {
            let value = match provider_override {
                Some(provider) if *key == PROVIDER_VAR => Some(provider.to_string()),
                _ => lookup(key),
            };
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), v))
        })
        .collect()
}

/// Normalized provider name, from the override or `LLM_PROVIDER`
pub fn provider<F>(lookup: F, provider_override: Option<&str>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    provider_override
        .map(str::to_string)
        .or_else(|| lookup(PROVIDER_VAR))
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
}
