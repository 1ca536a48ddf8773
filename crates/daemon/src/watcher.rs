//! Config file change detection.
//!
//! The parent directory is watched rather than the file itself: editors
//! that save by writing a temporary file and renaming it over the original
//! would otherwise leave the watch pointing at a deleted inode.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Start watching `config_path`. Every relevant change sends one `()` on
/// `signals`; bursts are collapsed downstream by the reload debounce.
///
/// Dropping the returned watcher stops watching and closes the channel.
pub fn watch_config(config_path: &Path, signals: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let file_name = config_path
        .file_name()
        .map(OsString::from)
        .with_context(|| format!("config path {} has no file name", config_path.display()))?;
    let dir = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().context("failed to resolve current directory")?,
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&event, &file_name) {
                debug!(kind = ?event.kind, "config file changed");
                // A full channel already holds a pending reload.
                let _ = signals.try_send(());
            }
        }
        Err(e) => error!(error = %e, "config watch error"),
    })
    .context("failed to create config watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    info!(dir = %dir.display(), "watching configuration for changes");
    Ok(watcher)
}

/// Whether `event` touches the config file in a way that may change it.
fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    kind_matters
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RenameMode};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_relevant_events() {
        let name = OsString::from("config.toml");
        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/gwg/config.toml"),
            &name
        ));
        assert!(is_relevant(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                "/etc/gwg/config.toml"
            ),
            &name
        ));
        assert!(is_relevant(
            &event(EventKind::Create(CreateKind::File), "/etc/gwg/config.toml"),
            &name
        ));
    }

    #[test]
    fn test_irrelevant_events() {
        let name = OsString::from("config.toml");
        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/gwg/.config.toml.swp"),
            &name
        ));
        assert!(!is_relevant(
            &event(EventKind::Access(AccessKind::Any), "/etc/gwg/config.toml"),
            &name
        ));
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = watch_config(&tmp.path().join("gone/config.toml"), tx);
        assert!(result.is_err());
    }
}
