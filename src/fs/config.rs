use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use rootcause::{Report, report};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{index::IndexPaths, settings::SettingEntry},
    session::SessionConfig,
};

pub const APP_NAME: &str = "Sift";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Directories whose entries are applications.
    pub application_dirs: Vec<PathBuf>,
    /// Applications outside of `application_dirs`.
    pub applications: Vec<PathBuf>,
    /// Root of the file index.
    pub scan_root: PathBuf,
    pub reindex_on_startup: bool,
    /// Per kind of item.
    pub history_limit: usize,
    /// `None` picks one thread per CPU.
    pub compute_threads: Option<usize>,
    /// An empty list uses the platform's usual settings screens.
    pub settings: Vec<SettingEntry>,
}

#[cfg(target_os = "macos")]
const APPLICATION_DIRS: [&str; 6] = [
    "/Applications",
    "/Applications/Utilities",
    "/System/Applications",
    "/System/Applications/Utilities",
    "/System/Library/CoreServices/Applications",
    "~/Applications",
];

#[cfg(target_os = "macos")]
const APPLICATIONS: [&str; 1] = ["/System/Library/CoreServices/Finder.app"];

#[cfg(target_os = "windows")]
const APPLICATION_DIRS: [&str; 2] = [
    "~/AppData/Roaming/Microsoft/Windows/Start Menu/Programs",
    "C:/ProgramData/Microsoft/Windows/Start Menu/Programs",
];

#[cfg(target_os = "windows")]
const APPLICATIONS: [&str; 0] = [];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const APPLICATION_DIRS: [&str; 3] = [
    "/usr/share/applications",
    "/usr/local/share/applications",
    "~/.local/share/applications",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const APPLICATIONS: [&str; 0] = [];

impl Default for Configuration {
    fn default() -> Self {
        Self {
            application_dirs: APPLICATION_DIRS.iter().map(|dir| expand_home(dir)).collect(),
            applications: APPLICATIONS.iter().map(|app| expand_home(app)).collect(),
            scan_root: dirs::home_dir().unwrap_or_default(),
            reindex_on_startup: true,
            history_limit: 200,
            compute_threads: None,
            settings: Vec::new(),
        }
    }
}

impl Configuration {
    /// `<config dir>/Sift/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    }

    /// Reads the configuration at `path`. A missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file can't be read or isn't valid.
    pub fn load(path: &Path) -> Result<Self, Report> {
        let config = match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)
                .map_err(|error| error.attach(format!("in {}", path.display())))?,
            Err(error) if error.kind() == ErrorKind::NotFound => Self::default(),
            Err(error) => return Err(report!(error).attach("reading the configuration").into()),
        };
        config.validate()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Fails on invalid TOML or unknown value types.
    pub fn from_toml(text: &str) -> Result<Self, Report> {
        let mut config: Self = toml::from_str(text)?;
        config.application_dirs = config
            .application_dirs
            .iter()
            .map(|dir| expand_home(&dir.to_string_lossy()))
            .collect();
        config.applications = config
            .applications
            .iter()
            .map(|app| expand_home(&app.to_string_lossy()))
            .collect();
        config.scan_root = expand_home(&config.scan_root.to_string_lossy());

        Ok(config)
    }

    /// # Errors
    ///
    /// Fails on a zero history limit, an empty scan root or zero compute
    /// threads.
    pub fn validate(&self) -> Result<(), Report> {
        if self.history_limit == 0 {
            return Err(report!("history_limit must be at least 1"));
        }
        if self.scan_root.as_os_str().is_empty() {
            return Err(report!("scan_root is empty and there is no home directory"));
        }
        if self.compute_threads == Some(0) {
            return Err(report!("compute_threads must be at least 1"));
        }

        Ok(())
    }

    #[must_use]
    pub fn session_config(&self, paths: &DataPaths) -> SessionConfig {
        SessionConfig {
            index_paths: IndexPaths {
                database: paths.index_database(),
                scan_root: self.scan_root.clone(),
                temp_dir: paths.index_temp_dir(),
            },
            reindex_on_startup: self.reindex_on_startup,
            history_limit: self.history_limit,
            compute_threads: self.compute_threads,
        }
    }
}

/// Turns a leading `~` into the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_default(),
        _ => PathBuf::from(path),
    }
}

/// Where the index and the history live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// `<local data dir>/Sift`.
    ///
    /// # Errors
    ///
    /// Fails on platforms without a local data directory.
    pub fn platform() -> Result<Self, Report> {
        let root = dirs::data_local_dir()
            .ok_or_else(|| report!("no local data directory on this platform"))?;

        Ok(Self::at(root.join(APP_NAME)))
    }

    #[must_use]
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the directories the paths point into.
    ///
    /// # Errors
    ///
    /// Fails when the directories can't be created.
    pub fn create(&self) -> Result<(), Report> {
        fs::create_dir_all(self.index_temp_dir())
            .map_err(|error| report!(error).attach(format!("creating {}", self.root.display())))?;

        Ok(())
    }

    #[must_use]
    pub fn index_database(&self) -> PathBuf {
        self.root.join("files.idx")
    }

    #[must_use]
    pub fn index_temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    #[must_use]
    pub fn history_file(&self, kind: crate::items::ItemKind) -> PathBuf {
        self.root.join(format!("history-{kind}.json"))
    }
}
