use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Which flavour of RTC session the app runs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    #[default]
    VideoCall,
    VoiceCall,
    Broadcast,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub rtc_app_id: String,
    #[serde(default)]
    pub product: Product,
    #[serde(default)]
    pub rtc_token: Option<String>,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub voice_access_token: Option<String>,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub backend_anon_key: Option<String>,
}

const ENV_RTC_APP_ID: &str = "VELO_RTC_APP_ID";
const ENV_RTC_TOKEN: &str = "VELO_RTC_TOKEN";
const ENV_VOICE_ACCESS_TOKEN: &str = "VELO_VOICE_ACCESS_TOKEN";
const ENV_BACKEND_URL: &str = "VELO_BACKEND_URL";
const ENV_BACKEND_ANON_KEY: &str = "VELO_BACKEND_ANON_KEY";

impl Settings {
    /// Overlay non-empty `VELO_*` environment variables.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_RTC_APP_ID) {
            self.rtc_app_id = v;
        }
        if let Some(v) = get(ENV_RTC_TOKEN) {
            self.rtc_token = Some(v);
        }
        if let Some(v) = get(ENV_VOICE_ACCESS_TOKEN) {
            self.voice_access_token = Some(v);
        }
        if let Some(v) = get(ENV_BACKEND_URL) {
            self.backend_url = Some(v);
        }
        if let Some(v) = get(ENV_BACKEND_ANON_KEY) {
            self.backend_anon_key = Some(v);
        }
        self
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    /// Persisted settings with environment overrides applied.
    pub fn get(&self) -> Settings {
        self.lock().clone().with_env_overrides()
    }

    /// Persisted settings only.
    pub fn stored(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_rtc_app_id(&self, app_id: String) {
        self.lock().rtc_app_id = app_id;
        self.save();
    }

    pub fn set_product(&self, product: Product) {
        self.lock().product = product;
        self.save();
    }

    pub fn set_rtc_token(&self, token: Option<String>) {
        self.lock().rtc_token = token;
        self.save();
    }

    pub fn set_uid(&self, uid: u32) {
        self.lock().uid = uid;
        self.save();
    }

    pub fn set_token_url(&self, url: Option<String>) {
        self.lock().token_url = url;
        self.save();
    }

    pub fn set_voice_access_token(&self, token: Option<String>) {
        self.lock().voice_access_token = token;
        self.save();
    }

    pub fn set_backend(&self, url: Option<String>, anon_key: Option<String>) {
        {
            let mut settings = self.lock();
            settings.backend_url = url;
            settings.backend_anon_key = anon_key;
        }
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self) {
        let settings = self.lock().clone();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(path = %self.file_path.display(), "failed to save settings: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "corrupt settings, using defaults: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.product, Product::VideoCall);
        assert_eq!(s.uid, 0);
        assert!(s.rtc_token.is_none());
        assert!(s.backend_url.is_none());
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.stored(), Settings::default());
    }

    #[test]
    fn test_setters_persist() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = SettingsStore::new(path);
            store.set_rtc_app_id("app-123".to_string());
            store.set_product(Product::VoiceCall);
            store.set_uid(42);
            store.set_backend(Some("https://db.example.com".into()), Some("anon".into()));
        }
        let store = SettingsStore::new(path);
        let s = store.stored();
        assert_eq!(s.rtc_app_id, "app-123");
        assert_eq!(s.product, Product::VoiceCall);
        assert_eq!(s.uid, 42);
        assert_eq!(s.backend_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(s.backend_anon_key.as_deref(), Some("anon"));
    }

    #[test]
    fn test_clear_token() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        store.set_rtc_token(Some("t".into()));
        store.set_rtc_token(None);
        assert_eq!(store.stored().rtc_token, None);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.stored(), Settings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"rtc_app_id":"abc","product":"broadcast"}"#,
        )
        .unwrap();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        let s = store.stored();
        assert_eq!(s.rtc_app_id, "abc");
        assert_eq!(s.product, Product::Broadcast);
        assert_eq!(s.uid, 0);
        assert!(s.token_url.is_none());
    }

    #[test]
    fn test_overrides_skip_empty_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_BACKEND_URL, "https://env.example.com"),
            (ENV_VOICE_ACCESS_TOKEN, "  "),
            (ENV_RTC_APP_ID, "env-app"),
        ]);
        let base = Settings {
            voice_access_token: Some("stored".into()),
            ..Default::default()
        };
        let s = base.with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(s.backend_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(s.voice_access_token.as_deref(), Some("stored"));
        assert_eq!(s.rtc_app_id, "env-app");
    }
}
