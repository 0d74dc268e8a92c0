use serde::{Deserialize, Serialize};

use crate::error::ChatError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const AVAILABLE_MODELS: &[ModelInfo] = &[
    ModelInfo { id: "gpt-4o", name: "GPT-4o", description: "Flagship multimodal model" },
    ModelInfo { id: "gpt-4o-mini", name: "GPT-4o mini", description: "Small, fast and inexpensive" },
    ModelInfo { id: "gpt-4", name: "GPT-4", description: "Most capable model, best at complex tasks" },
    ModelInfo {
        id: "gpt-4-turbo-preview",
        name: "GPT-4 Turbo",
        description: "Latest GPT-4 model with improved performance",
    },
    ModelInfo { id: "gpt-3.5-turbo", name: "GPT-3.5 Turbo", description: "Good balance of capability and speed" },
    ModelInfo {
        id: "gpt-3.5-turbo-16k",
        name: "GPT-3.5 Turbo 16K",
        description: "Same as GPT-3.5 but with 16K token context",
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    AVAILABLE_MODELS.iter().find(|m| m.id == id)
}

/// Generation parameters carried by every chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenAIParameters {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for OpenAIParameters {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".into(),
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 1.0,
        }
    }
}

impl OpenAIParameters {
    pub const MAX_TOKENS_RANGE: std::ops::RangeInclusive<u32> = 1..=4096;
    pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;
    pub const TOP_P_RANGE: std::ops::RangeInclusive<f32> = 0.0..=1.0;

    pub fn validate(&self) -> Result<(), ChatError> {
        if find_model(&self.model).is_none() {
            return Err(ChatError::InvalidParameters(format!("unknown model `{}`", self.model)));
        }
        if !Self::MAX_TOKENS_RANGE.contains(&self.max_tokens) {
            return Err(ChatError::InvalidParameters(format!(
                "max_tokens {} outside 1..=4096",
                self.max_tokens
            )));
        }
        // contains() is false for NaN, which is what we want
        if !Self::TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ChatError::InvalidParameters(format!(
                "temperature {} outside 0..=2",
                self.temperature
            )));
        }
        if !Self::TOP_P_RANGE.contains(&self.top_p) {
            return Err(ChatError::InvalidParameters(format!("top_p {} outside 0..=1", self.top_p)));
        }
        Ok(())
    }
}

/// Partial update of [`OpenAIParameters`]; unset fields keep their value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelParamsPatch {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl OpenAIParameters {
    pub fn patched(&self, patch: &ModelParamsPatch) -> OpenAIParameters {
        OpenAIParameters {
            model: patch.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: patch.max_tokens.unwrap_or(self.max_tokens),
            temperature: patch.temperature.unwrap_or(self.temperature),
            top_p: patch.top_p.unwrap_or(self.top_p),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Empty means no credential is configured.
    pub openai_api_key: String,
    pub base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

impl AppConfig {
    pub fn api_key(&self) -> Option<&str> {
        let key = self.openai_api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    pub fn apply_patch(&mut self, patch: AppConfigPatch) {
        if let Some(key) = patch.openai_api_key {
            self.openai_api_key = key.trim().to_string();
        }
        if let Some(url) = patch.base_url {
            self.base_url = url;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigPatch {
    pub openai_api_key: Option<String>,
    pub base_url: Option<String>,
}

impl AppConfigPatch {
    /// Overrides taken from `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL").ok().filter(|u| !u.trim().is_empty()),
        }
    }
}

/// Overrides win over the stored config, which wins over defaults.
pub fn resolve_effective_config(stored: &AppConfig, overrides: &AppConfigPatch) -> AppConfig {
    let openai_api_key = overrides
        .openai_api_key
        .clone()
        .unwrap_or_else(|| stored.openai_api_key.clone());
    let base_url = overrides
        .base_url
        .clone()
        .or_else(|| (!stored.base_url.trim().is_empty()).then(|| stored.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.into());

    AppConfig { openai_api_key, base_url }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OpenAIParameters::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_and_unknown_model() {
        let base = OpenAIParameters::default();
        let bad = [
            OpenAIParameters { model: "gpt-9".into(), ..base.clone() },
            OpenAIParameters { max_tokens: 0, ..base.clone() },
            OpenAIParameters { max_tokens: 4097, ..base.clone() },
            OpenAIParameters { temperature: 2.5, ..base.clone() },
            OpenAIParameters { temperature: f32::NAN, ..base.clone() },
            OpenAIParameters { top_p: -0.1, ..base.clone() },
        ];
        for p in bad {
            assert!(
                matches!(p.validate(), Err(ChatError::InvalidParameters(_))),
                "{p:?} should be rejected"
            );
        }
        let edge = OpenAIParameters { model: "gpt-4o-mini".into(), max_tokens: 4096, temperature: 2.0, top_p: 0.0 };
        edge.validate().unwrap();
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let base = OpenAIParameters::default();
        let p = base.patched(&ModelParamsPatch { temperature: Some(0.2), ..Default::default() });
        assert_eq!(p.temperature, 0.2);
        assert_eq!(p.model, base.model);
        assert_eq!(p.max_tokens, base.max_tokens);
    }

    #[test]
    fn params_wire_names_match_stored_format() {
        let v = serde_json::to_value(OpenAIParameters::default()).unwrap();
        assert_eq!(v["maxTokens"], 2048);
        assert_eq!(v["topP"], 1.0);
    }

    #[test]
    fn precedence_override_over_stored_over_default() {
        let stored = AppConfig { openai_api_key: "stored-key".into(), base_url: String::new() };
        let eff = resolve_effective_config(&stored, &AppConfigPatch::default());
        assert_eq!(eff.openai_api_key, "stored-key");
        assert_eq!(eff.base_url, DEFAULT_BASE_URL);

        let overrides = AppConfigPatch {
            openai_api_key: Some("env-key".into()),
            base_url: Some("http://localhost:8080/v1".into()),
        };
        let eff = resolve_effective_config(&stored, &overrides);
        assert_eq!(eff.openai_api_key, "env-key");
        assert_eq!(eff.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn blank_key_counts_as_unconfigured() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.api_key(), None);
        cfg.apply_patch(AppConfigPatch { openai_api_key: Some("  sk-1  ".into()), base_url: None });
        assert_eq!(cfg.api_key(), Some("sk-1"));
    }

    #[test]
    fn legacy_config_without_base_url_gets_default() {
        let cfg: AppConfig = serde_json::from_str(r#"{"openaiApiKey":"k"}"#).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }
}
