use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;
use walkdir::WalkDir;

use crate::{
    catalog::{AppsProvider, CatalogError},
    fs::config::Configuration,
    items::AppItem,
};

/// Start Menu folders nest shortcuts, app folders elsewhere are flat.
const SCAN_DEPTH: usize = if cfg!(target_os = "windows") { 3 } else { 1 };

#[inline]
#[must_use]
pub fn is_app_path(path: &Path) -> bool {
    let extension = path.extension().and_then(OsStr::to_str);
    if cfg!(target_os = "macos") {
        extension == Some("app")
    } else if cfg!(target_os = "windows") {
        matches!(extension, Some("exe" | "lnk"))
    } else {
        extension == Some("desktop")
    }
}

/// Finds applications in the configured directories.
#[derive(Debug, Clone)]
pub struct DesktopApps {
    application_dirs: Vec<PathBuf>,
    applications: Vec<PathBuf>,
}

impl DesktopApps {
    #[must_use]
    pub fn new(config: &Configuration) -> Self {
        Self {
            application_dirs: config.application_dirs.clone(),
            applications: config.applications.clone(),
        }
    }

    fn app_paths(&self) -> Result<Vec<PathBuf>, CatalogError> {
        let mut denied = None;
        let mut paths = Vec::new();

        for dir in &self.application_dirs {
            for entry in WalkDir::new(dir)
                .min_depth(1)
                .max_depth(SCAN_DEPTH)
                .follow_links(true)
            {
                match entry {
                    Ok(entry) if is_app_path(entry.path()) => paths.push(entry.into_path()),
                    Ok(_) => {}
                    Err(error) => {
                        debug!("skipping in {}: {error}", dir.display());
                        if error
                            .io_error()
                            .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
                        {
                            denied = Some(dir.display().to_string());
                        }
                    }
                }
            }
        }

        if paths.is_empty()
            && let Some(dir) = denied
        {
            return Err(CatalogError::PermissionDenied(dir));
        }

        paths.extend(self.applications.iter().filter(|app| app.exists()).cloned());
        Ok(paths)
    }
}

impl AppsProvider for DesktopApps {
    fn installed_apps(&self) -> Result<Vec<AppItem>, CatalogError> {
        let mut apps: Vec<AppItem> = self
            .app_paths()?
            .iter()
            .filter_map(|path| app_at(path))
            .collect();
        apps.sort_by(|a, b| a.label.cmp(&b.label));

        Ok(apps)
    }
}

fn app_at(path: &Path) -> Option<AppItem> {
    let location = path.to_str()?;
    if path.extension().is_some_and(|extension| extension == "desktop") {
        let text = fs::read_to_string(path).ok()?;
        let entry = DesktopEntry::parse(&text)?;
        return Some(AppItem::new(&entry.name, location, &entry.exec));
    }

    let name = path.file_stem()?.to_str()?;
    Some(AppItem::new(name, location, ""))
}

/// The parts of a freedesktop `.desktop` file we need.
#[derive(Debug, PartialEq, Eq)]
struct DesktopEntry {
    name: String,
    exec: String,
}

impl DesktopEntry {
    /// `None` for entries that aren't launchable applications.
    fn parse(text: &str) -> Option<Self> {
        let mut in_entry = false;
        let mut name = None;
        let mut exec = None;

        for line in text.lines().map(str::trim) {
            if line.starts_with('[') {
                in_entry = line == "[Desktop Entry]";
                continue;
            }
            if !in_entry {
                continue;
            }

            match line.split_once('=').map(|(k, v)| (k.trim(), v.trim())) {
                Some(("Name", value)) => name = Some(value.to_owned()),
                Some(("Exec", value)) => exec = Some(strip_field_codes(value)),
                Some(("NoDisplay" | "Hidden", "true")) => return None,
                Some(("Type", value)) if value != "Application" => return None,
                _ => {}
            }
        }

        Some(Self {
            name: name?,
            exec: exec?,
        })
    }
}

/// Drops `%f`, `%U` and friends, which only make sense with arguments.
fn strip_field_codes(exec: &str) -> String {
    exec.split_whitespace()
        .filter(|part| !(part.len() == 2 && part.starts_with('%')))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_desktop_entries() {
        let entry = DesktopEntry::parse(
            "[Desktop Entry]\nType=Application\nName=Files\nExec=nautilus --new-window %U\n\n[Desktop Action new]\nName=New Window\n",
        )
        .unwrap();
        assert_eq!(entry.name, "Files");
        assert_eq!(entry.exec, "nautilus --new-window");
    }

    #[test]
    fn hidden_entries_are_skipped() {
        assert!(DesktopEntry::parse("[Desktop Entry]\nName=X\nExec=x\nNoDisplay=true\n").is_none());
        assert!(DesktopEntry::parse("[Desktop Entry]\nType=Link\nName=X\nExec=x\n").is_none());
        assert!(DesktopEntry::parse("[Desktop Entry]\nName=X\n").is_none());
    }

    #[test]
    fn scans_configured_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (app, other) = if cfg!(target_os = "macos") {
            let app = dir.path().join("Maps.app");
            fs::create_dir(&app).unwrap();
            (app, dir.path().join("notes.txt"))
        } else if cfg!(target_os = "windows") {
            let app = dir.path().join("Maps.exe");
            fs::write(&app, b"").unwrap();
            (app, dir.path().join("notes.txt"))
        } else {
            let app = dir.path().join("maps.desktop");
            fs::write(&app, "[Desktop Entry]\nType=Application\nName=Maps\nExec=maps\n").unwrap();
            (app, dir.path().join("notes.txt"))
        };
        fs::write(&other, "not an app").unwrap();

        let config = Configuration {
            application_dirs: vec![dir.path().to_path_buf()],
            applications: vec![dir.path().join("missing.app")],
            ..Configuration::default()
        };
        let apps = DesktopApps::new(&config).installed_apps().unwrap();

        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].label.as_str(), "Maps");
        assert_eq!(apps[0].package_name.as_str(), app.to_str().unwrap());
    }
}
