//! Heroku client error types.

use thiserror::Error;

/// Errors returned by [`HerokuClient`](crate::HerokuClient).
#[derive(Debug, Error)]
pub enum HerokuError {
    #[error("no Heroku API token found (set HEROKU_API_KEY or HEROKU_OAUTH_TOKEN)")]
    MissingToken,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("heroku api returned {status}: {message}")]
    Status { status: u16, message: String },
}

pub type HerokuResult<T> = Result<T, HerokuError>;
