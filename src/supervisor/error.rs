use std::fmt;

/// Failure category shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BuildFailure,
    SpawnFailure,
    TerminationFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::BuildFailure => write!(f, "BuildFailure"),
            FailureKind::SpawnFailure => write!(f, "SpawnFailure"),
            FailureKind::TerminationFailure => write!(f, "TerminationFailure"),
        }
    }
}

/// Error from supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// A build step returned non-zero or could not be run.
    #[error("build of '{target}' failed: {reason}")]
    Build { target: String, reason: String },

    /// The child was spawned without one of its output pipes.
    #[error("failed to capture {stream} of {program}")]
    Pipe {
        program: String,
        stream: &'static str,
    },

    /// The child process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Neither the graceful nor the forced signal reached the process.
    #[error("failed to terminate process {pid}: {reason}")]
    Termination { pid: u32, reason: String },
}

impl SupervisorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::Build { .. } => FailureKind::BuildFailure,
            SupervisorError::Pipe { .. } | SupervisorError::Spawn { .. } => {
                FailureKind::SpawnFailure
            }
            SupervisorError::Termination { .. } => FailureKind::TerminationFailure,
        }
    }

    /// Message for the dashboard's error slot, tagged with the failure kind.
    pub fn display_message(&self) -> String {
        format!("{}: {self}", self.kind())
    }
}
