//! Request/response tracing to a directory.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use log::{debug, warn};
use serde::Serialize;

/// One traced HTTP exchange.
#[derive(Debug, Serialize)]
pub(super) struct TraceEntry<'a> {
    pub operation: &'a str,
    pub method: &'a str,
    pub url: &'a str,
    pub request: Option<&'a serde_json::Value>,
    pub status: u16,
    pub response: serde_json::Value,
}

/// Writes numbered JSON trace files into a directory.
#[derive(Debug)]
pub(super) struct TraceRecorder {
    dir: Dir,
    path: Utf8PathBuf,
    sequence: AtomicU32,
}

impl TraceRecorder {
    /// Opens `path`, creating it when missing.
    pub(super) fn open(path: &Utf8Path) -> io::Result<Self> {
        Dir::create_ambient_dir_all(path, ambient_authority())?;
        let dir = Dir::open_ambient_dir(path, ambient_authority())?;
        debug!("tracing requests to {path}");
        Ok(Self {
            dir,
            path: path.to_owned(),
            sequence: AtomicU32::new(0),
        })
    }

    /// Records an exchange. Write failures are logged and otherwise ignored.
    pub(super) fn record(&self, entry: &TraceEntry<'_>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{sequence:04}-{}.json", entry.operation);
        let contents = match serde_json::to_vec_pretty(entry) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("failed to serialise trace {name}: {err}");
                return;
            }
        };
        if let Err(err) = self.dir.write(&name, contents) {
            warn!("failed to write trace {}/{name}: {err}", self.path);
        }
    }
}

/// Parses a response body as JSON, keeping raw text when it is not.
pub(super) fn response_value(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_numbered_files() {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("traces")).expect("utf8 path");
        let recorder = TraceRecorder::open(&root).expect("open recorder");

        for operation in ["login", "create-volume"] {
            recorder.record(&TraceEntry {
                operation,
                method: "POST",
                url: "https://vc.example/api",
                request: None,
                status: 200,
                response: response_value("\"token\""),
            });
        }

        assert!(root.join("0001-login.json").exists());
        let second = std::fs::read_to_string(root.join("0002-create-volume.json"))
            .expect("second trace");
        assert!(second.contains("\"status\": 200"), "trace: {second}");
    }

    #[test]
    fn non_json_bodies_are_kept_as_text() {
        assert_eq!(
            response_value("<html>"),
            serde_json::Value::String(String::from("<html>"))
        );
    }
}
