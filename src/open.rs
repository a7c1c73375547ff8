use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};

use rootcause::{Report, report};

use crate::items::{AppItem, DisplayItem, ItemKind};

/// Activates a result.
pub trait ItemOpener: Send + Sync + 'static {
    /// # Errors
    ///
    /// Fails when the item can't be started.
    fn open(&self, item: &DisplayItem) -> Result<(), Report>;
}

/// What the user is told when opening an item of `kind` failed.
#[must_use]
pub fn failure_message(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::App => "Could not start app",
        ItemKind::Setting => "Setting unavailable",
        ItemKind::File => "Failed to open file",
    }
}

/// Hands items to the desktop's opener.
#[derive(Debug, Clone)]
pub struct SystemOpener {
    scan_root: PathBuf,
}

impl SystemOpener {
    #[must_use]
    pub fn new(scan_root: PathBuf) -> Self {
        Self { scan_root }
    }

    fn open_app(app: &AppItem) -> Result<(), Report> {
        // Launchers that know how to start themselves leave a command line.
        if !app.activity_name.is_empty() {
            Command::new("sh")
                .arg("-c")
                .arg(app.activity_name.as_str())
                .spawn()?;
            return Ok(());
        }

        open_with_system(app.package_name.as_str())
    }

    fn file_path(&self, relative: &str) -> PathBuf {
        self.scan_root.join(Path::new(relative))
    }
}

impl ItemOpener for SystemOpener {
    fn open(&self, item: &DisplayItem) -> Result<(), Report> {
        match item {
            DisplayItem::App(app) => Self::open_app(app),
            DisplayItem::Setting(setting) => open_setting(setting.field_value.as_str()),
            DisplayItem::File(file) => {
                let path = self.file_path(&file.path);
                if !path.exists() {
                    let shown = path.display();
                    return Err(report!("{shown} does not exist"));
                }
                open_with_system(path)
            }
        }
    }
}

/// Settings are URIs on macOS and Windows, and a control-center command
/// line elsewhere.
fn open_setting(value: &str) -> Result<(), Report> {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        open_with_system(value)
    } else {
        Command::new("sh").arg("-c").arg(value).spawn()?;
        Ok(())
    }
}

fn open_with_system(target: impl AsRef<OsStr>) -> Result<(), Report> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };

    command.arg(target).spawn()?;

    Ok(())
}
