//! Trigger marker files.
//!
//! Downstream consumers poll the modification time of a marker file to learn
//! that a working copy changed. Refreshing it is best-effort: callers log
//! failures and carry on.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;

use crate::errors::TriggerError;

/// Set the marker's modification time to now, creating an empty marker if
/// it does not exist yet. Calling it repeatedly is harmless.
pub fn ensure_marker_fresh(path: &Path) -> Result<(), TriggerError> {
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => {
            file.set_modified(SystemTime::now())
                .map_err(|source| TriggerError::Touch {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(trigger = %path.display(), "trigger touched");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            File::create(path).map_err(|source| TriggerError::Create {
                path: path.to_path_buf(),
                source,
            })?;
            if !path.exists() {
                return Err(TriggerError::Missing {
                    path: path.to_path_buf(),
                });
            }
            debug!(trigger = %path.display(), "trigger created");
            Ok(())
        }
        Err(source) => Err(TriggerError::Touch {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_creates_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("deployed");
        ensure_marker_fresh(&marker).unwrap();
        assert!(marker.exists());
        assert_eq!(std::fs::metadata(&marker).unwrap().len(), 0);
    }

    #[test]
    fn test_refreshes_existing_marker_without_touching_content() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("deployed");
        std::fs::write(&marker, "keep me").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&marker)
            .unwrap()
            .set_modified(old)
            .unwrap();

        ensure_marker_fresh(&marker).unwrap();

        let mtime = std::fs::metadata(&marker).unwrap().modified().unwrap();
        assert!(mtime > old + Duration::from_secs(60));
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "keep me");
    }

    #[test]
    fn test_missing_parent_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("no/such/dir/deployed");
        let err = ensure_marker_fresh(&marker).unwrap_err();
        assert!(matches!(err, TriggerError::Create { .. }));
    }
}
