//! Error taxonomy of an experiment run.
//!
//! Substrate calls return `anyhow` errors with context chains; each core
//! component wraps them into the variant naming the phase that failed.

/// Errors that abort (part of) an experiment run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to build topology: {0:#}")]
    TopologyBuild(#[source] anyhow::Error),

    #[error("failed to program flows on {switch}: {source:#}")]
    FlowProgramming {
        switch: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to deploy {function}: {source:#}")]
    Deployment {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("traffic measurement failed: {0:#}")]
    Measurement(#[source] anyhow::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Short tag used in log lines and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::TopologyBuild(_) => "topology",
            Error::FlowProgramming { .. } => "flows",
            Error::Deployment { .. } => "deployment",
            Error::Measurement(_) => "measurement",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
