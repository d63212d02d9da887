//! Top-level error aggregation for the CLI boundary: every subcommand's
//! error type funnels through here so `main` has one `miette::Report` to
//! render regardless of which component failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] pta_core::ConfigError),
    #[error(transparent)]
    Resolver(#[from] pta_core::ResolverError),
    #[error(transparent)]
    Cache(#[from] pta_core::CacheError),
    #[error(transparent)]
    Launcher(#[from] pta_core::LauncherError),
    #[error(transparent)]
    Status(#[from] pta_core::StatusError),
    #[error("unrecognized input method {0:?}; expected one of stdin, environment, both, powershell")]
    UnknownInputMethod(String),
}
