use std::{process::ExitCode, sync::Arc};

use rootcause::{Report, report};
use sift::{
    aggregate::UiState,
    catalog::settings::ConfiguredSettings,
    fs::{
        apps::DesktopApps,
        config::{Configuration, DataPaths},
        db::JsonHistoryStore,
        path_index::PathListIndex,
    },
    items::{DisplayName, ItemKind},
    open::SystemOpener,
    permission::{AccessOutcome, ReadableRoot},
    session::{Collaborators, HistoryStores, SearchSession},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How many results are printed after each update.
const SHOWN_RESULTS: usize = 20;

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Query(&'a str),
    Open(usize),
    Forget(usize),
    History,
    Reindex,
    Rescan,
    Count,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let Some(command) = line.strip_prefix(':') else {
            return Command::Query(line);
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let index = parts.next().and_then(|n| n.parse::<usize>().ok());

        match (name, index) {
            ("open", Some(n)) => Command::Open(n),
            ("forget", Some(n)) => Command::Forget(n),
            ("history", _) => Command::History,
            ("reindex", _) => Command::Reindex,
            ("rescan", _) => Command::Rescan,
            ("count", _) => Command::Count,
            ("quit" | "q", _) => Command::Quit,
            _ => Command::Unknown(line),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("SIFT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            error!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Report> {
    let config_path = Configuration::default_path()
        .ok_or_else(|| report!("no configuration directory on this platform"))?;
    let config = Configuration::load(&config_path)?;
    let paths = DataPaths::platform()?;
    paths.create()?;
    info!("configuration from {}", config_path.display());

    let history_store = |kind| Arc::new(JsonHistoryStore::open(paths.history_file(kind)));
    let collaborators = Collaborators {
        apps: Arc::new(DesktopApps::new(&config)),
        settings: Arc::new(ConfiguredSettings::new(config.settings.clone())),
        index: Arc::new(PathListIndex),
        history: HistoryStores {
            apps: history_store(ItemKind::App),
            settings: history_store(ItemKind::Setting),
            files: history_store(ItemKind::File),
        },
        opener: Arc::new(SystemOpener::new(config.scan_root.clone())),
        prompt: Arc::new(ReadableRoot(config.scan_root.clone())),
    };

    let session = SearchSession::new(collaborators, config.session_config(&paths))?;

    match session.request_file_access().await? {
        AccessOutcome::Granted => {}
        AccessOutcome::Denied => warn!("no access to {}, files are not searched", config.scan_root.display()),
        AccessOutcome::NeedsRationale(rationale) => {
            println!("Sift reads {} to search your files.", config.scan_root.display());
            session.retry_file_access(rationale).await?;
        }
    }

    let result = repl(&session).await;
    session.shutdown().await;

    result
}

async fn repl(session: &SearchSession) -> Result<(), Report> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = session.state();
    let mut messages = session.messages();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let current = state.borrow().clone();
                if !handle(session, &current, line.trim()).await {
                    return Ok(());
                }
            }
            Ok(()) = state.changed() => {
                print_results(&state.borrow_and_update());
            }
            message = messages.recv() => match message {
                Ok(message) => println!("! {} ({})", message.text, message.kind),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            Some(fatal) = session.next_fatal() => {
                return Err(fatal);
            }
        }
    }
}

/// Runs one input line. `false` ends the session.
async fn handle(session: &SearchSession, state: &UiState, line: &str) -> bool {
    match Command::parse(line) {
        Command::Query(query) => session.on_search_changed(query),
        Command::Open(n) => match state.items.get(n) {
            Some(result) => session.open(result.item.clone()).await,
            None => println!("no result #{n}"),
        },
        Command::Forget(n) => match state.history.as_deref().and_then(|history| history.get(n)) {
            Some(item) => session.forget(item),
            None => println!("no history entry #{n}"),
        },
        Command::History => match state.history.as_deref() {
            Some(history) => {
                for (n, item) in history.iter().enumerate() {
                    println!("{n:>3}  [{}] {}", item.kind(), item.display_name());
                }
            }
            None => println!("history is still loading"),
        },
        Command::Reindex => session.reindex(),
        Command::Rescan => session.refresh_apps(),
        Command::Count => {
            let count = *session.indexed_count().borrow();
            let index = session.index_state().borrow().clone();
            println!("{count} files indexed, index {index}");
        }
        Command::Quit => return false,
        Command::Unknown(line) => println!("unknown command {line}"),
    }

    true
}

fn print_results(state: &UiState) {
    if state.is_placeholder() {
        println!("loading...");
        return;
    }

    for (n, result) in state.items.iter().take(SHOWN_RESULTS).enumerate() {
        println!(
            "{n:>3}  [{}] {} ({})",
            result.item.kind(),
            result.item.display_name(),
            result.weight
        );
    }
    if state.items.len() > SHOWN_RESULTS {
        println!("     ... {} more", state.items.len() - SHOWN_RESULTS);
    }
    println!("--");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("file!mp3"), Command::Query("file!mp3"));
        assert_eq!(Command::parse(":open 2"), Command::Open(2));
        assert_eq!(Command::parse(":forget 0"), Command::Forget(0));
        assert_eq!(Command::parse(":history"), Command::History);
        assert_eq!(Command::parse(":rescan"), Command::Rescan);
        assert_eq!(Command::parse(":q"), Command::Quit);
        assert_eq!(Command::parse(":open x"), Command::Unknown(":open x"));
    }
}
