use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum KairosError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Missing `{0}` header in time reference response")]
    MissingDateHeader(&'static str),

    #[error("Unparseable time reference date: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Ractor error: {0}")]
    RactorError(String),
}

impl From<figment::Error> for KairosError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
