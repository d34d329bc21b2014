//! User preferences.
//!
//! [`SettingsStore`] owns the in-memory [`Settings`] aggregate and publishes
//! it through a `watch` channel. Updates land in memory first and are then
//! written to the [`KeyValueStore`] one key at a time in the background; a
//! failed write is logged and otherwise ignored. Writes are numbered when
//! they are published, and a write older than the last one persisted for
//! its key is dropped, so the stored value always ends at the newest.

use crate::models::AiModel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const DEFAULT_LOCALE: &str = "en";

pub const KEY_SERVER_URL: &str = "server_url";
pub const KEY_GEMINI_API_KEY: &str = "gemini_api_key";
pub const KEY_THEME_MODE: &str = "theme_mode";
pub const KEY_SELECTED_MODEL: &str = "selected_model";
pub const KEY_SIDEBAR_EXPANDED: &str = "sidebar_expanded";
pub const KEY_MESSAGE_DISPLAY_MODE: &str = "messageDisplayMode";
pub const KEY_FONT_SIZE: &str = "fontSize";
pub const KEY_LOCALE: &str = "locale";

pub const SETTING_KEYS: &[&str] = &[
    KEY_SERVER_URL,
    KEY_GEMINI_API_KEY,
    KEY_THEME_MODE,
    KEY_SELECTED_MODEL,
    KEY_SIDEBAR_EXPANDED,
    KEY_MESSAGE_DISPLAY_MODE,
    KEY_FONT_SIZE,
    KEY_LOCALE,
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// String key/value persistence used by the settings store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                #[doc = $text]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            /// Unknown values fall back to the default variant.
            pub fn parse_lossy(raw: &str) -> Self {
                match raw {
                    $($text => $name::$variant,)+
                    _ => $name::$default,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }
    };
}

string_enum!(ThemeMode { Light => "light", Dark => "dark", System => "system" } default System);
string_enum!(MessageDisplayMode { Bubble => "bubble", Document => "document" } default Bubble);
string_enum!(FontSize { Small => "small", Medium => "medium", Large => "large" } default Medium);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub gemini_api_key: Option<String>,
    pub theme_mode: ThemeMode,
    pub selected_model: String,
    pub message_display_mode: MessageDisplayMode,
    pub font_size: FontSize,
    pub locale: String,
    pub sidebar_expanded: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            gemini_api_key: None,
            theme_mode: ThemeMode::default(),
            selected_model: AiModel::default().as_str().to_string(),
            message_display_mode: MessageDisplayMode::default(),
            font_size: FontSize::default(),
            locale: DEFAULT_LOCALE.to_string(),
            sidebar_expanded: true,
        }
    }
}

impl Settings {
    pub fn model(&self) -> AiModel {
        AiModel::parse_lossy(&self.selected_model)
    }

    /// Read every key, each with its own default. Any read error fails the whole load.
    fn read_from(store: &dyn KeyValueStore) -> Result<Self, StoreError> {
        let defaults = Settings::default();
        Ok(Self {
            server_url: store.get(KEY_SERVER_URL)?.unwrap_or(defaults.server_url),
            gemini_api_key: store.get(KEY_GEMINI_API_KEY)?,
            theme_mode: store
                .get(KEY_THEME_MODE)?
                .map_or(defaults.theme_mode, |v| ThemeMode::parse_lossy(&v)),
            selected_model: store
                .get(KEY_SELECTED_MODEL)?
                .unwrap_or(defaults.selected_model),
            message_display_mode: store
                .get(KEY_MESSAGE_DISPLAY_MODE)?
                .map_or(defaults.message_display_mode, |v| {
                    MessageDisplayMode::parse_lossy(&v)
                }),
            font_size: store
                .get(KEY_FONT_SIZE)?
                .map_or(defaults.font_size, |v| FontSize::parse_lossy(&v)),
            locale: store.get(KEY_LOCALE)?.unwrap_or(defaults.locale),
            sidebar_expanded: store
                .get(KEY_SIDEBAR_EXPANDED)?
                .map_or(defaults.sidebar_expanded, |v| v == "true"),
        })
    }
}

/// What the view layer observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsState {
    Loading,
    Ready(Settings),
}

/// A pending key write.
enum Write {
    Set(&'static str, String),
    Remove(&'static str),
}

impl Write {
    fn key(&self) -> &'static str {
        match self {
            Write::Set(key, _) | Write::Remove(key) => key,
        }
    }
}

/// Sequence numbers of published and persisted writes.
#[derive(Default)]
struct WriteLog {
    issued: AtomicU64,
    persisted: Mutex<HashMap<&'static str, u64>>,
}

impl WriteLog {
    fn next(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run `write` unless a newer write for `key` already reached the store.
    fn persist(&self, key: &'static str, seq: u64, write: impl FnOnce()) {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        if persisted.get(key).is_some_and(|&done| done > seq) {
            debug!(key, seq, "Skipping superseded setting write");
            return;
        }
        persisted.insert(key, seq);
        write();
    }
}

/// Shared handle over the settings aggregate. Cloning shares state.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    state: Arc<watch::Sender<SettingsState>>,
    writes: Arc<WriteLog>,
}

impl SettingsStore {
    /// Load the aggregate, falling back to defaults if anything goes wrong.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, _rx) = watch::channel(SettingsState::Loading);
        let this = Self {
            store,
            state: Arc::new(tx),
            writes: Arc::new(WriteLog::default()),
        };
        let settings = this.read_all().await;
        this.state.send_replace(SettingsState::Ready(settings));
        this
    }

    async fn read_all(&self) -> Settings {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || Settings::read_from(store.as_ref())).await;
        match loaded {
            Ok(Ok(settings)) => {
                info!("Settings loaded");
                settings
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read settings, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!(error = %e, "Settings load task failed, using defaults");
                Settings::default()
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SettingsState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SettingsState {
        self.state.borrow().clone()
    }

    /// Current aggregate; defaults while a reload is in flight.
    pub fn current(&self) -> Settings {
        match &*self.state.borrow() {
            SettingsState::Ready(settings) => settings.clone(),
            SettingsState::Loading => Settings::default(),
        }
    }

    /// Publish the merged aggregate now, persist the single key afterwards.
    fn apply(&self, mutate: impl FnOnce(&mut Settings), write: Write) -> JoinHandle<()> {
        // numbered under the channel's write lock so publish order and write order agree
        let mut seq = 0;
        self.state.send_modify(|state| {
            seq = self.writes.next();
            match state {
                SettingsState::Ready(settings) => mutate(settings),
                SettingsState::Loading => {
                    let mut settings = Settings::default();
                    mutate(&mut settings);
                    *state = SettingsState::Ready(settings);
                }
            }
        });

        let store = Arc::clone(&self.store);
        let writes = Arc::clone(&self.writes);
        tokio::task::spawn_blocking(move || {
            let key = write.key();
            writes.persist(key, seq, || {
                let result = match &write {
                    Write::Set(key, value) => store.set(key, value),
                    Write::Remove(key) => store.remove(key),
                };
                match result {
                    Ok(()) => debug!(key, "Setting persisted"),
                    Err(e) => warn!(key, error = %e, "Failed to persist setting"),
                }
            });
        })
    }

    pub fn update_server_url(&self, url: impl Into<String>) -> JoinHandle<()> {
        let url = url.into();
        let value = url.clone();
        self.apply(|s| s.server_url = url, Write::Set(KEY_SERVER_URL, value))
    }

    /// `None` removes the stored key rather than storing an empty string.
    pub fn update_gemini_api_key(&self, api_key: Option<String>) -> JoinHandle<()> {
        let write = match &api_key {
            Some(key) => Write::Set(KEY_GEMINI_API_KEY, key.clone()),
            None => Write::Remove(KEY_GEMINI_API_KEY),
        };
        self.apply(|s| s.gemini_api_key = api_key, write)
    }

    pub fn update_theme_mode(&self, mode: ThemeMode) -> JoinHandle<()> {
        self.apply(
            |s| s.theme_mode = mode,
            Write::Set(KEY_THEME_MODE, mode.as_str().to_string()),
        )
    }

    pub fn update_selected_model(&self, model: impl Into<String>) -> JoinHandle<()> {
        let model = model.into();
        let value = model.clone();
        self.apply(
            |s| s.selected_model = model,
            Write::Set(KEY_SELECTED_MODEL, value),
        )
    }

    pub fn update_message_display_mode(&self, mode: MessageDisplayMode) -> JoinHandle<()> {
        self.apply(
            |s| s.message_display_mode = mode,
            Write::Set(KEY_MESSAGE_DISPLAY_MODE, mode.as_str().to_string()),
        )
    }

    pub fn update_font_size(&self, size: FontSize) -> JoinHandle<()> {
        self.apply(
            |s| s.font_size = size,
            Write::Set(KEY_FONT_SIZE, size.as_str().to_string()),
        )
    }

    pub fn update_locale(&self, locale: impl Into<String>) -> JoinHandle<()> {
        let locale = locale.into();
        let value = locale.clone();
        self.apply(|s| s.locale = locale, Write::Set(KEY_LOCALE, value))
    }

    pub fn update_sidebar_expanded(&self, expanded: bool) -> JoinHandle<()> {
        self.apply(
            |s| s.sidebar_expanded = expanded,
            Write::Set(KEY_SIDEBAR_EXPANDED, expanded.to_string()),
        )
    }

    /// Remove every stored key and load again from scratch.
    pub async fn reset_settings(&self) {
        let mut seq = 0;
        self.state.send_modify(|state| {
            seq = self.writes.next();
            *state = SettingsState::Loading;
        });
        let store = Arc::clone(&self.store);
        let writes = Arc::clone(&self.writes);
        let cleared = tokio::task::spawn_blocking(move || {
            for &key in SETTING_KEYS {
                writes.persist(key, seq, || {
                    if let Err(e) = store.remove(key) {
                        warn!(key, error = %e, "Failed to clear setting");
                    }
                });
            }
        })
        .await;
        if let Err(e) = cleared {
            warn!(error = %e, "Settings reset task failed");
        }
        let settings = self.read_all().await;
        self.state.send_replace(SettingsState::Ready(settings));
        info!("Settings reset");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    /// In-memory store with switchable failures.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        /// When set, the next read blocks until a message arrives.
        read_gate: Mutex<Option<mpsc::Receiver<()>>>,
        /// Writes of this value stall before landing.
        slow_value: Mutex<Option<String>>,
    }

    impl MemoryStore {
        pub(crate) fn with(pairs: &[(&str, &str)]) -> Self {
            let store = Self::default();
            {
                let mut values = store.values.lock().unwrap();
                for (k, v) in pairs {
                    values.insert(k.to_string(), v.to_string());
                }
            }
            store
        }

        fn raw(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let gate = self.read_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("read failed".into()));
            }
            Ok(self.raw(key))
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("write failed".into()));
            }
            if self.slow_value.lock().unwrap().as_deref() == Some(value) {
                std::thread::sleep(Duration::from_millis(100));
            }
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_defaults_from_empty_store() {
        let store = SettingsStore::load(Arc::new(MemoryStore::default())).await;
        assert_eq!(store.current(), Settings::default());
        assert_eq!(store.current().server_url, DEFAULT_SERVER_URL);
        assert_eq!(store.current().model(), AiModel::LocalRag);
    }

    #[tokio::test]
    async fn test_load_reads_each_key() {
        let backend = MemoryStore::with(&[
            (KEY_SERVER_URL, "http://10.0.0.2:9000"),
            (KEY_GEMINI_API_KEY, "secret"),
            (KEY_THEME_MODE, "dark"),
            (KEY_SELECTED_MODEL, "gemini"),
            (KEY_MESSAGE_DISPLAY_MODE, "document"),
            (KEY_FONT_SIZE, "huge"),
            (KEY_LOCALE, "ko"),
            (KEY_SIDEBAR_EXPANDED, "false"),
        ]);
        let settings = SettingsStore::load(Arc::new(backend)).await.current();
        assert_eq!(settings.server_url, "http://10.0.0.2:9000");
        assert_eq!(settings.gemini_api_key.as_deref(), Some("secret"));
        assert_eq!(settings.theme_mode, ThemeMode::Dark);
        assert_eq!(settings.model(), AiModel::Gemini);
        assert_eq!(settings.message_display_mode, MessageDisplayMode::Document);
        assert_eq!(settings.font_size, FontSize::Medium);
        assert_eq!(settings.locale, "ko");
        assert!(!settings.sidebar_expanded);
    }

    #[tokio::test]
    async fn test_read_failure_falls_back_to_all_defaults() {
        let backend = MemoryStore::with(&[(KEY_LOCALE, "fr")]);
        backend.fail_reads.store(true, Ordering::SeqCst);
        let store = SettingsStore::load(Arc::new(backend)).await;
        assert_eq!(store.state(), SettingsState::Ready(Settings::default()));
    }

    #[tokio::test]
    async fn test_update_is_visible_before_persisting() {
        let backend = Arc::new(MemoryStore::default());
        let store = SettingsStore::load(backend.clone()).await;

        let pending = store.update_server_url("http://x");
        assert_eq!(store.current().server_url, "http://x");
        pending.await.unwrap();
        assert_eq!(backend.raw(KEY_SERVER_URL).as_deref(), Some("http://x"));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_in_memory_value() {
        let backend = Arc::new(MemoryStore::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = SettingsStore::load(backend.clone()).await;

        store.update_server_url("http://x").await.unwrap();
        assert_eq!(store.current().server_url, "http://x");
        assert_eq!(backend.raw(KEY_SERVER_URL), None);

        // a cold load sees the old value
        backend.fail_writes.store(false, Ordering::SeqCst);
        let reloaded = SettingsStore::load(backend).await;
        assert_eq!(reloaded.current().server_url, DEFAULT_SERVER_URL);
    }

    #[tokio::test]
    async fn test_updates_touch_only_their_key() {
        let backend = Arc::new(MemoryStore::default());
        let store = SettingsStore::load(backend.clone()).await;

        store.update_theme_mode(ThemeMode::Light).await.unwrap();
        store.update_font_size(FontSize::Large).await.unwrap();
        store
            .update_message_display_mode(MessageDisplayMode::Document)
            .await
            .unwrap();
        store.update_locale("de").await.unwrap();
        store.update_selected_model("web_search").await.unwrap();
        store.update_sidebar_expanded(false).await.unwrap();

        assert_eq!(backend.raw(KEY_THEME_MODE).as_deref(), Some("light"));
        assert_eq!(backend.raw(KEY_FONT_SIZE).as_deref(), Some("large"));
        assert_eq!(backend.raw(KEY_MESSAGE_DISPLAY_MODE).as_deref(), Some("document"));
        assert_eq!(backend.raw(KEY_LOCALE).as_deref(), Some("de"));
        assert_eq!(backend.raw(KEY_SELECTED_MODEL).as_deref(), Some("web_search"));
        assert_eq!(backend.raw(KEY_SIDEBAR_EXPANDED).as_deref(), Some("false"));
        assert_eq!(backend.raw(KEY_SERVER_URL), None);

        let current = store.current();
        assert_eq!(current.theme_mode, ThemeMode::Light);
        assert_eq!(current.model(), AiModel::WebSearch);
        assert_eq!(current.server_url, DEFAULT_SERVER_URL);
    }

    #[tokio::test]
    async fn test_clearing_api_key_removes_it() {
        let backend = Arc::new(MemoryStore::default());
        let store = SettingsStore::load(backend.clone()).await;

        store.update_gemini_api_key(Some("k".into())).await.unwrap();
        assert_eq!(backend.raw(KEY_GEMINI_API_KEY).as_deref(), Some("k"));

        store.update_gemini_api_key(None).await.unwrap();
        assert_eq!(backend.raw(KEY_GEMINI_API_KEY), None);
        assert_eq!(store.current().gemini_api_key, None);
    }

    #[tokio::test]
    async fn test_reset_publishes_loading_then_defaults() {
        let backend = Arc::new(MemoryStore::with(&[(KEY_LOCALE, "ja"), (KEY_THEME_MODE, "dark")]));
        let store = SettingsStore::load(backend.clone()).await;
        assert_eq!(store.current().locale, "ja");

        let mut rx = store.subscribe();
        rx.borrow_and_update();
        store.reset_settings().await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SettingsState::Ready(Settings::default()));
        assert_eq!(backend.raw(KEY_LOCALE), None);
        assert_eq!(backend.raw(KEY_THEME_MODE), None);
    }

    #[tokio::test]
    async fn test_reset_is_loading_until_reload_finishes() {
        let backend = Arc::new(MemoryStore::with(&[(KEY_LOCALE, "ja")]));
        let store = SettingsStore::load(backend.clone()).await;
        let (release, gate) = mpsc::channel();
        *backend.read_gate.lock().unwrap() = Some(gate);

        let mut rx = store.subscribe();
        let resetting = tokio::spawn({
            let store = store.clone();
            async move { store.reset_settings().await }
        });

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SettingsState::Loading);
        assert_eq!(store.state(), SettingsState::Loading);

        release.send(()).unwrap();
        resetting.await.unwrap();
        assert_eq!(store.state(), SettingsState::Ready(Settings::default()));
    }

    #[tokio::test]
    async fn test_rapid_updates_persist_the_latest_value() {
        let backend = Arc::new(MemoryStore::default());
        *backend.slow_value.lock().unwrap() = Some("http://a".into());
        let store = SettingsStore::load(backend.clone()).await;

        let first = store.update_server_url("http://a");
        let second = store.update_server_url("http://b");
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(store.current().server_url, "http://b");
        assert_eq!(backend.raw(KEY_SERVER_URL).as_deref(), Some("http://b"));

        let reloaded = SettingsStore::load(backend).await;
        assert_eq!(reloaded.current().server_url, "http://b");
    }

    #[tokio::test]
    async fn test_reset_drops_writes_issued_before_it() {
        let backend = Arc::new(MemoryStore::default());
        *backend.slow_value.lock().unwrap() = Some("fr".into());
        let store = SettingsStore::load(backend.clone()).await;

        let stale = store.update_locale("fr");
        store.reset_settings().await;
        stale.await.unwrap();
        assert_eq!(backend.raw(KEY_LOCALE), None);
        assert_eq!(store.current().locale, DEFAULT_LOCALE);
    }
}
