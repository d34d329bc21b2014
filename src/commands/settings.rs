use crate::models::AiModel;
use crate::settings::Settings;
use serde::Serialize;

/// Settings as shown on the settings page. Secrets are masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    pub server_url: String,
    pub gemini_api_key: Option<String>,
    pub theme_mode: &'static str,
    pub selected_model: String,
    pub message_display_mode: &'static str,
    pub font_size: &'static str,
    pub locale: String,
    pub sidebar_expanded: bool,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            gemini_api_key: settings.gemini_api_key.as_deref().map(mask_secret),
            theme_mode: settings.theme_mode.as_str(),
            selected_model: settings.selected_model.clone(),
            message_display_mode: settings.message_display_mode.as_str(),
            font_size: settings.font_size.as_str(),
            locale: settings.locale.clone(),
            sidebar_expanded: settings.sidebar_expanded,
        }
    }
}

/// Keep the first and last four characters of long secrets, hide short ones.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
}

impl From<AiModel> for ModelInfo {
    fn from(model: AiModel) -> Self {
        Self {
            id: model.as_str(),
            name: model.display_name(),
            provider: if model.is_local() { "Local" } else { "Google" },
        }
    }
}

/// Models usable with the current settings. Gemini needs an API key.
pub fn available_models(settings: &Settings) -> Vec<ModelInfo> {
    let has_gemini_key = settings
        .gemini_api_key
        .as_deref()
        .is_some_and(|key| !key.is_empty());

    AiModel::ALL
        .into_iter()
        .filter(|model| model.is_local() || has_gemini_key)
        .map(ModelInfo::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("AIzaSyExample1234"), "AIza...1234");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret(""), "");
    }

    #[test]
    fn test_view_masks_api_key() {
        let settings = Settings {
            gemini_api_key: Some("AIzaSyExample1234".into()),
            ..Settings::default()
        };
        let view = SettingsView::from(&settings);
        assert_eq!(view.gemini_api_key.as_deref(), Some("AIza...1234"));
        assert_eq!(view.theme_mode, "system");
        assert_eq!(view.font_size, "medium");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["server_url"], "http://localhost:8000");
        assert_eq!(json["sidebar_expanded"], true);
    }

    #[test]
    fn test_available_models_depend_on_key() {
        let mut settings = Settings::default();
        let ids: Vec<&str> = available_models(&settings).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["local_rag", "web_search"]);

        settings.gemini_api_key = Some("key".into());
        let models = available_models(&settings);
        assert_eq!(models.len(), 3);
        assert_eq!(models[2].provider, "Google");
    }
}
