use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    catalog::{CatalogError, CatalogResult, CatalogSource, SettingsProvider},
    items::SettingItem,
    tasks::TaskScope,
};

/// The OS configuration screens.
#[derive(Debug)]
pub struct SettingsCatalog {
    source: CatalogSource<SettingItem>,
}

impl SettingsCatalog {
    pub fn new(provider: Arc<dyn SettingsProvider>, scope: &TaskScope) -> Self {
        Self {
            source: CatalogSource::new("settings", scope, move || provider.settings()),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> watch::Receiver<CatalogResult<Arc<[SettingItem]>>> {
        self.source.catalog()
    }
}

/// One settings screen as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    /// `NAMESPACE_WORDS_OF_THE_NAME`, humanized for display.
    pub field_name: String,
    /// Handed to the system opener.
    pub field_value: String,
}

/// Settings screens that exist on most desktops, used when the
/// configuration doesn't list any.
#[cfg(target_os = "macos")]
const DEFAULT_SETTINGS: [(&str, &str); 8] = [
    ("ACTION_WIFI_SETTINGS", "x-apple.systempreferences:com.apple.wifi-settings-extension"),
    ("ACTION_BLUETOOTH_SETTINGS", "x-apple.systempreferences:com.apple.BluetoothSettings"),
    ("ACTION_NETWORK_SETTINGS", "x-apple.systempreferences:com.apple.Network-Settings.extension"),
    ("ACTION_DISPLAY_SETTINGS", "x-apple.systempreferences:com.apple.Displays-Settings.extension"),
    ("ACTION_SOUND_SETTINGS", "x-apple.systempreferences:com.apple.Sound-Settings.extension"),
    ("ACTION_KEYBOARD_SETTINGS", "x-apple.systempreferences:com.apple.Keyboard-Settings.extension"),
    ("ACTION_PRIVACY_SETTINGS", "x-apple.systempreferences:com.apple.settings.PrivacySecurity.extension"),
    ("ACTION_DATE_SETTINGS", "x-apple.systempreferences:com.apple.Date-Time-Settings.extension"),
];

#[cfg(target_os = "windows")]
const DEFAULT_SETTINGS: [(&str, &str); 8] = [
    ("ACTION_WIFI_SETTINGS", "ms-settings:network-wifi"),
    ("ACTION_BLUETOOTH_SETTINGS", "ms-settings:bluetooth"),
    ("ACTION_NETWORK_SETTINGS", "ms-settings:network"),
    ("ACTION_DISPLAY_SETTINGS", "ms-settings:display"),
    ("ACTION_SOUND_SETTINGS", "ms-settings:sound"),
    ("ACTION_KEYBOARD_SETTINGS", "ms-settings:typing"),
    ("ACTION_PRIVACY_SETTINGS", "ms-settings:privacy"),
    ("ACTION_DATE_SETTINGS", "ms-settings:dateandtime"),
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const DEFAULT_SETTINGS: [(&str, &str); 8] = [
    ("ACTION_WIFI_SETTINGS", "gnome-control-center wifi"),
    ("ACTION_BLUETOOTH_SETTINGS", "gnome-control-center bluetooth"),
    ("ACTION_NETWORK_SETTINGS", "gnome-control-center network"),
    ("ACTION_DISPLAY_SETTINGS", "gnome-control-center display"),
    ("ACTION_SOUND_SETTINGS", "gnome-control-center sound"),
    ("ACTION_KEYBOARD_SETTINGS", "gnome-control-center keyboard"),
    ("ACTION_PRIVACY_SETTINGS", "gnome-control-center privacy"),
    ("ACTION_DATE_SETTINGS", "gnome-control-center datetime"),
];

#[must_use]
pub fn default_settings() -> Vec<SettingEntry> {
    DEFAULT_SETTINGS
        .iter()
        .map(|(field_name, field_value)| SettingEntry {
            field_name: (*field_name).to_owned(),
            field_value: (*field_value).to_owned(),
        })
        .collect()
}

/// Settings taken from the configuration. The field name doubles as id.
#[derive(Debug, Clone)]
pub struct ConfiguredSettings(Vec<SettingEntry>);

impl ConfiguredSettings {
    #[must_use]
    pub fn new(entries: Vec<SettingEntry>) -> Self {
        if entries.is_empty() {
            Self(default_settings())
        } else {
            Self(entries)
        }
    }
}

impl SettingsProvider for ConfiguredSettings {
    fn settings(&self) -> Result<Vec<SettingItem>, CatalogError> {
        Ok(self
            .0
            .iter()
            .map(|entry| SettingItem::new(&entry.field_name, &entry.field_name, &entry.field_value))
            .collect())
    }
}
