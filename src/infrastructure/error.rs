use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

impl InfraError {
    /// Status code of a failed HTTP response, read from the `http NNN` marker
    /// the REST clients put in their messages.
    pub fn http_status(&self) -> Option<u16> {
        let Self::Http(message) = self else {
            return None;
        };
        let (_, rest) = message.split_once("http ")?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }
}
