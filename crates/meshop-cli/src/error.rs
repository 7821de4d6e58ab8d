//! CLI error type
//!
//! Library errors are sorted into a handful of categories, each with its own
//! diagnostic code and, where it helps, a hint.

use miette::Diagnostic;
use thiserror::Error;

use meshop_core::CoreError;
use meshop_engine::EngineError;
use meshop_kube::KubeError;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// The merged spec, overlay or `--set` entries are invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(meshop::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A chart could not be loaded or rendered
    #[error("Render error: {message}")]
    #[diagnostic(code(meshop::cli::render))]
    Render {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The cluster could not be reached or rejected a request
    #[error("Cluster error: {message}")]
    #[diagnostic(code(meshop::cli::cluster))]
    Cluster { message: String },

    #[error("Upgrade failed: {message}")]
    #[diagnostic(code(meshop::cli::upgrade))]
    Upgrade {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Abort.")]
    #[diagnostic(code(meshop::cli::aborted))]
    Aborted,

    #[error("IO error: {message}")]
    #[diagnostic(code(meshop::cli::io))]
    Io { message: String },
}

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn render_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    fn upgrade(message: impl Into<String>, help: Option<&str>) -> Self {
        Self::Upgrade {
            message: message.into(),
            help: help.map(str::to_string),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnsupportedUpgrade { .. } => {
                CliError::upgrade(err.to_string(), Some("use --force to skip the compatibility check"))
            }
            CoreError::ReadFile { .. } | CoreError::Io(_) => CliError::Io {
                message: err.to_string(),
            },
            CoreError::UnknownProfile { .. } => CliError::Config {
                message: err.to_string(),
                help: Some("run `meshop profile list` to see the builtin profiles".into()),
            },
            other => CliError::config(other.to_string()),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(e) => e.into(),
            EngineError::MissingPackagePath => CliError::render_with_help(
                err.to_string(),
                "set installPackagePath in the spec, pass --charts or set MESHOP_CHARTS",
            ),
            EngineError::Io(e) => e.into(),
            other => CliError::Render {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(e) => e.into(),
            KubeError::Engine(e) => e.into(),
            KubeError::Io(e) => e.into(),
            KubeError::InvalidSelector { .. } | KubeError::InvalidConfig(_) => CliError::config(err.to_string()),
            KubeError::Aborted => CliError::Aborted,
            KubeError::VersionMismatch { .. } => {
                CliError::upgrade(err.to_string(), Some("use --force to upgrade to a different version"))
            }
            KubeError::ControlPlaneNotFound { .. }
            | KubeError::MixedVersions { .. }
            | KubeError::RolloutUnfinished { .. }
            | KubeError::HookFailed { .. } => CliError::upgrade(err.to_string(), None),
            other => CliError::Cluster {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Diagnostic;

    fn code(err: &CliError) -> String {
        err.code().map(|c| c.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_categories() {
        let unsupported: CliError = CoreError::UnsupportedUpgrade {
            current: "1.2.0".into(),
            target: "1.3.2".into(),
        }
        .into();
        assert_eq!(code(&unsupported), "meshop::cli::upgrade");
        assert!(unsupported.help().is_some());

        let missing: CliError = EngineError::MissingPackagePath.into();
        assert_eq!(code(&missing), "meshop::cli::render");

        let wrapped: CliError = KubeError::Core(CoreError::BadSetArgument { arg: "x".into() }).into();
        assert_eq!(code(&wrapped), "meshop::cli::config");

        assert!(matches!(CliError::from(KubeError::Aborted), CliError::Aborted));
    }
}
