/// QStar filesystem check: enumerate mounted `fuse.mcfs` filesystems and
/// parse the `mmparam` dump of each one.
use crate::command::CommandRunner;
use crate::filesystem::{self, FilesystemError, FilesystemRecord};
use crate::replica::ReplicaRecord;
use crate::state::{self, State};
use serde::Serialize;

/// Filesystem type of QStar cache mounts.
pub const MOUNT_TYPE: &str = "fuse.mcfs";

/// Identifies the collector in its own output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecord {
    pub name: String,
    pub version: String,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            name: "qstar".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Everything one filesystem check produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QstarState {
    pub filesystems: Vec<FilesystemRecord>,
    pub replicas: Vec<ReplicaRecord>,
    pub agent: AgentRecord,
}

impl QstarState {
    pub fn into_state(self) -> Result<State, serde_json::Error> {
        let mut out = State::new();
        state::insert(&mut out, "filesystems", &self.filesystems)?;
        state::insert(&mut out, "replicas", &self.replicas)?;
        state::insert(&mut out, "agent", std::slice::from_ref(&self.agent))?;
        Ok(out)
    }
}

/// Errors that abort the whole filesystem check.
#[derive(Debug)]
pub enum QstarError {
    /// `mmparam` could not be started.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// `mmparam` exited unsuccessfully.
    Exit {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The dump of a filesystem could not be parsed.
    Filesystem {
        name: String,
        source: FilesystemError,
    },
}

impl std::fmt::Display for QstarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QstarError::Spawn { command, source } => {
                write!(f, "failed to execute `{command}`: {source}")
            }
            QstarError::Exit {
                command,
                exit_code,
                stderr,
            } => match exit_code {
                Some(code) => write!(f, "`{command}` exited with {code}: {}", stderr.trim()),
                None => write!(f, "`{command}` killed by signal"),
            },
            QstarError::Filesystem { name, source } => {
                write!(f, "filesystem {name}: {source}")
            }
        }
    }
}

impl std::error::Error for QstarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QstarError::Spawn { source, .. } => Some(source),
            QstarError::Exit { .. } => None,
            QstarError::Filesystem { source, .. } => Some(source),
        }
    }
}

/// Filesystem names from a `df` listing: the first token of every line after
/// the header.
pub fn mount_names(listing: &str) -> Vec<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

/// Run the filesystem check.
///
/// A failing `df` means no QStar filesystems are mounted and yields an empty
/// result. Any failure for an individual filesystem fails the whole check.
pub fn check_qstar(runner: &dyn CommandRunner) -> Result<QstarState, QstarError> {
    let mut result = QstarState::default();

    let listing = match runner.run("df", &["-t", MOUNT_TYPE]) {
        Ok(out) if out.success() => out.stdout,
        Ok(out) => {
            tracing::warn!(
                exit_code = ?out.exit_code,
                stderr = %out.stderr.trim(),
                "df -t {MOUNT_TYPE} failed, reporting no filesystems"
            );
            return Ok(result);
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to execute df -t {MOUNT_TYPE}, reporting no filesystems");
            return Ok(result);
        }
    };

    for name in mount_names(&listing) {
        let dump = read_dump(runner, name)?;
        let report = filesystem::parse_filesystem(name, &dump).map_err(|source| {
            QstarError::Filesystem {
                name: name.to_string(),
                source,
            }
        })?;
        tracing::debug!(
            filesystem = name,
            replicas = report.replicas.len(),
            "parsed filesystem"
        );
        result.filesystems.push(report.filesystem);
        result.replicas.extend(report.replicas);
    }

    Ok(result)
}

fn read_dump(runner: &dyn CommandRunner, name: &str) -> Result<String, QstarError> {
    let command = format!("mmparam {name}");
    let out = runner
        .run("mmparam", &[name])
        .map_err(|source| QstarError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !out.success() {
        return Err(QstarError::Exit {
            command,
            exit_code: out.exit_code,
            stderr: out.stderr,
        });
    }
    Ok(out.stdout)
}
