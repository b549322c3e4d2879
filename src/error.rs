use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("request to backend failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GET {path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("decoding {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("time selection state {path}: {message}")]
    State { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, FleetError>;
