//! A plain list of paths as the filesystem index.
//!
//! The index file holds one path per line, relative to the scan root.

use std::{
    fs::{self, File},
    io::{BufWriter, ErrorKind, Write},
    path::Path,
};

use rayon::{iter::ParallelIterator, str::ParallelString};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::{
    catalog::index::{IndexError, IndexService},
    items::item_name::contains_ignore_case,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PathListIndex;

/// Dot-directories are caches and tool state, not things people look for.
fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

fn read(database: &Path) -> Result<String, IndexError> {
    fs::read_to_string(database).map_err(|error| match error.kind() {
        ErrorKind::InvalidData => IndexError::Corrupt(format!("{}: {error}", database.display())),
        _ => IndexError::Io(error),
    })
}

impl IndexService for PathListIndex {
    fn build(&self, database: &Path, scan_root: &Path, temp_dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(temp_dir)?;
        if let Some(dir) = database.parent() {
            fs::create_dir_all(dir)?;
        }

        let staged = temp_dir.join("index.partial");
        let mut out = BufWriter::new(File::create(&staged)?);

        let walk = WalkDir::new(scan_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_hidden_dir(entry));

        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) if error.depth() == 0 => {
                    let root = scan_root.display();
                    return Err(match error.into_io_error() {
                        Some(io) if io.kind() == ErrorKind::PermissionDenied => {
                            IndexError::PermissionDenied(format!("{root}: {io}"))
                        }
                        Some(io) => IndexError::Io(io),
                        None => IndexError::Corrupt(format!("{root}: filesystem loop")),
                    });
                }
                Err(error) => {
                    debug!("not indexed: {error}");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(scan_root) else {
                continue;
            };
            match relative.to_str() {
                Some(path) if !path.contains('\n') => writeln!(out, "{path}")?,
                _ => debug!("not indexed, unusable name: {}", relative.display()),
            }
        }

        out.flush()?;
        drop(out);
        fs::rename(&staged, database)?;

        Ok(())
    }

    fn search(
        &self,
        database: &Path,
        terms: &[&str],
        include: &[bool],
    ) -> Result<Vec<String>, IndexError> {
        if terms.len() != include.len() {
            return Err(IndexError::Corrupt(format!(
                "{} terms but {} include flags",
                terms.len(),
                include.len()
            )));
        }

        let index = read(database)?;
        let files = index
            .par_lines()
            .filter(|path| {
                terms
                    .iter()
                    .zip(include)
                    .all(|(term, include)| contains_ignore_case(path, term) == *include)
            })
            .map(str::to_owned)
            .collect();

        Ok(files)
    }

    fn stat_indexed_count(&self, database: &Path) -> Result<u64, IndexError> {
        Ok(read(database)?.lines().count() as u64)
    }
}
