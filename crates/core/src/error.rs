use std::path::PathBuf;
use thiserror::Error;

/// Setup-phase failures. These abort the whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {0}; create one based on config.example.json")]
    NotFound(PathBuf),
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("qTestUrl must be a valid URL starting with http:// or https:// (got \"{0}\")")]
    InvalidUrl(String),
    #[error(
        "auth configuration must include either bearerToken, or username, password and clientCredentials"
    )]
    MissingAuth,
    #[error("no users configured; add userLabMapping or auth.username to the configuration")]
    NoUsers,
    #[error("user \"{0}\" is not present in userLabMapping")]
    UnknownUser(String),
    #[error("live recommendations are not available; enable recommendations.enableMockMode")]
    LiveRecommendationsUnsupported,
}
