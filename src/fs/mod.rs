//! The desktop implementations of the collaborators: configuration,
//! application scanning, the path-list index and history files.

pub mod apps;
pub mod config;
pub mod db;
pub mod path_index;
