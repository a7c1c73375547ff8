pub mod item_name;

use std::{fmt::Display, sync::Arc};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use self::item_name::ItemName;

/// Relevance score, only used to order items that already matched.
pub type Weight = u32;

/// Anything that can be matched against a query by its name.
pub trait DisplayName {
    fn display_name(&self) -> &str;
}

/// Which catalog an item came from.
///
/// The declaration order is the fan-in order of the aggregate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Setting,
    App,
    File,
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Setting => write!(f, "setting"),
            ItemKind::App => write!(f, "app"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// PNG bytes of an application icon. Never persisted, re-resolved from the
/// live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIcon(pub Arc<[u8]>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppItem {
    /// Unique identifier, label + package.
    pub id: ArcStr,
    pub label: ItemName,
    pub package_name: ArcStr,
    pub activity_name: ArcStr,
    #[serde(skip)]
    pub icon: Option<AppIcon>,
}

impl AppItem {
    #[must_use]
    pub fn new(label: &str, package_name: &str, activity_name: &str) -> Self {
        Self {
            id: arcstr::format!("{label}{package_name}"),
            label: label.into(),
            package_name: package_name.into(),
            activity_name: activity_name.into(),
            icon: None,
        }
    }

    #[must_use]
    pub fn with_icon(mut self, icon: Option<AppIcon>) -> Self {
        self.icon = icon;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingItem {
    pub id: ArcStr,
    pub field_name: ArcStr,
    /// What gets handed to the opener, e.g. a settings URI.
    pub field_value: ArcStr,
    pub display_name: ItemName,
}

impl SettingItem {
    #[must_use]
    pub fn new(id: &str, field_name: &str, field_value: &str) -> Self {
        Self {
            id: id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
            display_name: humanize_field_name(field_name).into(),
        }
    }
}

/// Turns `ACTION_WIFI_SETTINGS` into `Wifi Settings`.
///
/// The first `_`-separated part is a namespace prefix and is dropped.
#[must_use]
pub fn humanize_field_name(field_name: &str) -> String {
    field_name
        .to_lowercase()
        .split('_')
        .skip(1)
        .map(|part| {
            let mut graphemes = part.graphemes(true);
            match graphemes.next() {
                Some(first) => first.to_uppercase() + graphemes.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A path relative to the indexed scan root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileItem {
    pub path: ArcStr,
}

impl FileItem {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self { path: path.into() }
    }
}

/// One searchable thing, from any catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayItem {
    App(AppItem),
    Setting(SettingItem),
    File(FileItem),
}

impl DisplayItem {
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            DisplayItem::App(_) => ItemKind::App,
            DisplayItem::Setting(_) => ItemKind::Setting,
            DisplayItem::File(_) => ItemKind::File,
        }
    }

    /// Stable, source-unique id used to merge and dedupe.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            DisplayItem::App(app) => app.id.as_str(),
            DisplayItem::Setting(setting) => setting.id.as_str(),
            DisplayItem::File(file) => file.path.as_str(),
        }
    }
}

impl DisplayName for AppItem {
    fn display_name(&self) -> &str {
        self.label.as_str()
    }
}

impl DisplayName for SettingItem {
    fn display_name(&self) -> &str {
        self.display_name.as_str()
    }
}

impl DisplayName for FileItem {
    fn display_name(&self) -> &str {
        self.path.as_str()
    }
}

impl DisplayName for DisplayItem {
    fn display_name(&self) -> &str {
        match self {
            DisplayItem::App(app) => app.display_name(),
            DisplayItem::Setting(setting) => setting.display_name(),
            DisplayItem::File(file) => file.display_name(),
        }
    }
}

impl From<AppItem> for DisplayItem {
    fn from(value: AppItem) -> Self {
        Self::App(value)
    }
}

impl From<SettingItem> for DisplayItem {
    fn from(value: SettingItem) -> Self {
        Self::Setting(value)
    }
}

impl From<FileItem> for DisplayItem {
    fn from(value: FileItem) -> Self {
        Self::File(value)
    }
}

/// An item that matched the current query, with its relevance weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedItem<T = DisplayItem> {
    pub weight: Weight,
    pub item: T,
}

impl<T: Into<DisplayItem>> WeightedItem<T> {
    #[must_use]
    pub fn into_display(self) -> WeightedItem {
        WeightedItem {
            weight: self.weight,
            item: self.item.into(),
        }
    }
}
