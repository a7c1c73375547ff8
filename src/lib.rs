//! One query over installed applications, settings screens and files.

pub mod aggregate;
pub mod catalog;
pub mod clock;
pub mod fs;
pub mod history;
pub mod items;
pub mod open;
pub mod permission;
pub mod search;
pub mod session;
pub mod tasks;
