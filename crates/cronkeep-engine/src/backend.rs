//! Storage of per-user schedule documents.
//!
//! The engine reads a user's document once, computes the new text, and hands
//! it back in a single write. Locking around that read-modify-write belongs to
//! the backend or the caller.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use cronkeep_core::config::{BackendConfig, BackendKind};

use crate::error::{CronError, Result};

/// Read, replace and delete the schedule document of one user.
pub trait CrontabBackend {
    /// Current text of `user`'s document.
    fn read(&self, user: &str) -> Result<String>;

    /// Replace `user`'s document with `text`.
    fn write(&self, user: &str, text: &str) -> Result<()>;

    /// Delete `user`'s document entirely.
    fn remove(&self, user: &str) -> Result<()>;
}

impl<B: CrontabBackend + ?Sized> CrontabBackend for Box<B> {
    fn read(&self, user: &str) -> Result<String> {
        (**self).read(user)
    }

    fn write(&self, user: &str, text: &str) -> Result<()> {
        (**self).write(user, text)
    }

    fn remove(&self, user: &str) -> Result<()> {
        (**self).remove(user)
    }
}

impl<B: CrontabBackend + ?Sized> CrontabBackend for &B {
    fn read(&self, user: &str) -> Result<String> {
        (**self).read(user)
    }

    fn write(&self, user: &str, text: &str) -> Result<()> {
        (**self).write(user, text)
    }

    fn remove(&self, user: &str) -> Result<()> {
        (**self).remove(user)
    }
}

/// Build the backend selected in configuration.
pub fn from_config(config: &BackendConfig) -> Box<dyn CrontabBackend> {
    debug!(kind = ?config.kind, strict = config.strict, "selecting crontab backend");
    match config.kind {
        BackendKind::Crontab => Box::new(
            CommandBackend::new(config.program.clone()).strict(config.strict),
        ),
        BackendKind::Spool => {
            Box::new(SpoolBackend::new(config.spool.clone()).strict(config.strict))
        }
        BackendKind::Memory => Box::new(MemoryBackend::new().strict(config.strict)),
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local documents. Counts writes so callers can check that an
/// in-sync reconciliation left storage alone.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tabs: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
    strict: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Seed a user's document without counting it as a write.
    pub fn with_document(self, user: &str, text: &str) -> Self {
        self.lock_tabs().insert(user.to_string(), text.to_string());
        self
    }

    /// The stored text, if the user has a document.
    pub fn document(&self, user: &str) -> Option<String> {
        self.lock_tabs().get(user).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tabs(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tabs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CrontabBackend for MemoryBackend {
    fn read(&self, user: &str) -> Result<String> {
        match self.lock_tabs().get(user) {
            Some(text) => Ok(text.clone()),
            None if self.strict => Err(CronError::NotFound {
                user: user.to_string(),
            }),
            None => Ok(String::new()),
        }
    }

    fn write(&self, user: &str, text: &str) -> Result<()> {
        self.lock_tabs().insert(user.to_string(), text.to_string());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn remove(&self, user: &str) -> Result<()> {
        self.lock_tabs().remove(user);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Spool directory
// ---------------------------------------------------------------------------

/// One file per user inside a spool directory, replaced atomically.
#[derive(Debug, Clone)]
pub struct SpoolBackend {
    dir: PathBuf,
    strict: bool,
}

impl SpoolBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The user's file inside the spool directory. Names that could resolve
    /// elsewhere are refused.
    fn path(&self, user: &str) -> Result<PathBuf> {
        let plain = !user.is_empty()
            && user != "."
            && !user.contains("..")
            && !user.contains(['/', '\\', '\0']);
        if !plain {
            return Err(CronError::AccessDenied {
                user: user.to_string(),
                reason: "user name is not a plain file name".into(),
            });
        }
        Ok(self.dir.join(user))
    }
}

fn map_io(user: &str, err: std::io::Error) -> CronError {
    match err.kind() {
        ErrorKind::PermissionDenied => CronError::AccessDenied {
            user: user.to_string(),
            reason: err.to_string(),
        },
        _ => CronError::Io(err),
    }
}

impl CrontabBackend for SpoolBackend {
    fn read(&self, user: &str) -> Result<String> {
        let path = self.path(user)?;
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(%user, path = %path.display(), bytes = text.len(), "read spool file");
                Ok(text)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.strict {
                    Err(CronError::NotFound {
                        user: user.to_string(),
                    })
                } else {
                    Ok(String::new())
                }
            }
            Err(e) => Err(map_io(user, e)),
        }
    }

    fn write(&self, user: &str, text: &str) -> Result<()> {
        let path = self.path(user)?;
        let temp = self.dir.join(format!(".{}.tmp.{}", user, std::process::id()));
        fs::write(&temp, text).map_err(|e| map_io(user, e))?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(map_io(user, e));
        }
        info!(%user, path = %path.display(), "wrote spool file");
        Ok(())
    }

    fn remove(&self, user: &str) -> Result<()> {
        let path = self.path(user)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(%user, path = %path.display(), "removed spool file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(user, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// crontab(1)
// ---------------------------------------------------------------------------

/// Drives the system `crontab` program with `-u <user>`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    strict: bool,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn command(&self, user: &str, action: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-u", user, action]);
        cmd
    }
}

/// Classify a failed crontab invocation by its stderr.
fn command_error(user: &str, stderr: &str) -> CronError {
    let message = stderr.trim().to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("not allowed") || lower.contains("permission denied") {
        CronError::AccessDenied {
            user: user.to_string(),
            reason: message,
        }
    } else {
        CronError::Backend(message)
    }
}

impl CrontabBackend for CommandBackend {
    fn read(&self, user: &str) -> Result<String> {
        let output = self.command(user, "-l").output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            debug!(%user, bytes = text.len(), "read crontab");
            return Ok(text);
        }
        if stderr.contains("no crontab for") {
            if self.strict {
                return Err(CronError::NotFound {
                    user: user.to_string(),
                });
            }
            warn!(%user, "user has no crontab yet");
            return Ok(String::new());
        }
        Err(command_error(user, &stderr))
    }

    fn write(&self, user: &str, text: &str) -> Result<()> {
        let mut child = self
            .command(user, "-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // stdin is dropped at the end of the match so the child sees EOF.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()),
            None => Ok(()),
        };

        // Reap the child even if the pipe broke; its exit status and stderr
        // explain an early exit better than EPIPE does.
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(command_error(user, &String::from_utf8_lossy(&output.stderr)));
        }
        written?;
        info!(%user, "installed crontab");
        Ok(())
    }

    fn remove(&self, user: &str) -> Result<()> {
        let output = self.command(user, "-r").output()?;
        if output.status.success() {
            info!(%user, "removed crontab");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab for") {
            return Ok(());
        }
        Err(command_error(user, &stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_counts_writes() {
        let backend = MemoryBackend::new().with_document("alice", "# seeded\n");
        assert_eq!(backend.read("alice").unwrap(), "# seeded\n");
        assert_eq!(backend.write_count(), 0);

        backend.write("alice", "0 * * * * date\n").unwrap();
        assert_eq!(backend.write_count(), 1);
        assert_eq!(backend.document("alice").as_deref(), Some("0 * * * * date\n"));

        backend.remove("alice").unwrap();
        assert_eq!(backend.document("alice"), None);
    }

    #[test]
    fn missing_document_is_empty_unless_strict() {
        assert_eq!(MemoryBackend::new().read("nobody").unwrap(), "");
        assert!(matches!(
            MemoryBackend::new().strict(true).read("nobody"),
            Err(CronError::NotFound { .. })
        ));
    }

    #[test]
    fn spool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SpoolBackend::new(dir.path());

        assert_eq!(backend.read("alice").unwrap(), "");
        backend.write("alice", "# hello\n").unwrap();
        assert_eq!(backend.read("alice").unwrap(), "# hello\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("alice")).unwrap(),
            "# hello\n"
        );

        backend.write("alice", "# replaced\n").unwrap();
        assert_eq!(backend.read("alice").unwrap(), "# replaced\n");

        // No temp files left behind.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("alice")]);

        backend.remove("alice").unwrap();
        backend.remove("alice").unwrap();
        assert_eq!(backend.read("alice").unwrap(), "");
    }

    #[test]
    fn strict_spool_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SpoolBackend::new(dir.path()).strict(true);
        assert!(matches!(
            backend.read("ghost"),
            Err(CronError::NotFound { user }) if user == "ghost"
        ));
    }

    #[test]
    fn spool_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SpoolBackend::new(dir.path().join("missing"));
        assert!(backend.write("alice", "x\n").is_err());
    }

    #[test]
    fn spool_refuses_names_outside_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let spool = root.path().join("spool");
        fs::create_dir(&spool).unwrap();
        let backend = SpoolBackend::new(&spool);

        for user in ["../escaped", "a/b", "..", ".", ""] {
            assert!(
                matches!(backend.write(user, "x\n"), Err(CronError::AccessDenied { .. })),
                "{user:?} accepted"
            );
            assert!(backend.read(user).is_err(), "{user:?} readable");
            assert!(backend.remove(user).is_err(), "{user:?} removable");
        }
        assert!(!root.path().join("escaped").exists());
        assert_eq!(fs::read_dir(&spool).unwrap().count(), 0);
    }

    #[test]
    fn crontab_stderr_classification() {
        assert!(matches!(
            command_error("bob", "You (bob) are not allowed to use this program\n"),
            CronError::AccessDenied { .. }
        ));
        assert!(matches!(
            command_error("bob", "crontab: installing new crontab failed\n"),
            CronError::Backend(_)
        ));
    }

    #[test]
    fn missing_program_surfaces_io_error() {
        let backend = CommandBackend::new("/nonexistent/cronkeep-test-crontab");
        assert!(matches!(backend.read("alice"), Err(CronError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn crontab_exiting_early_reports_failure() {
        // `false` exits without draining stdin, so a large write hits a broken pipe.
        let backend = CommandBackend::new("false");
        let text = "* * * * * true\n".repeat(64 * 1024);
        assert!(matches!(
            backend.write("alice", &text),
            Err(CronError::Backend(_))
        ));
    }

    #[test]
    fn from_config_picks_memory() {
        let config = BackendConfig {
            kind: BackendKind::Memory,
            ..BackendConfig::default()
        };
        let backend = from_config(&config);
        assert_eq!(backend.read("anyone").unwrap(), "");
    }
}
