use thiserror::Error;

pub const SUPPORT_HINT: &str =
    "If you were charged, please contact support with your payment reference.";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing or expired credentials. Callers clear stored tokens and send the user to login.
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    /// Charge or verification failure; the client cannot recover this on its own.
    #[error("payment failed: {message}")]
    Payment {
        message: String,
        reference: Option<String>,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("an update for {0} is already in flight")]
    Pending(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }

    /// Text suitable for a single user-facing alert.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Auth(_) => "Your session has expired. Please log in again.".into(),
            ClientError::Network(_) | ClientError::Http { .. } | ClientError::Decode(_) => {
                "Something went wrong. Please check your connection and try again.".into()
            }
            ClientError::Validation(msg) => msg.clone(),
            ClientError::Payment { message, reference } => match reference {
                Some(r) => format!("{} (reference {}). {}", message, r, SUPPORT_HINT),
                None => format!("{}. {}", message, SUPPORT_HINT),
            },
            ClientError::Pending(_) => "Please wait for the previous action to finish.".into(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ClientError::Decode(e.to_string());
        }
        match e.status() {
            Some(s) if s.as_u16() == 401 || s.as_u16() == 403 => ClientError::Auth(e.to_string()),
            Some(s) => ClientError::Http { status: s.as_u16(), body: e.to_string() },
            None => ClientError::Network(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(e: rusqlite::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(e: toml::de::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for ClientError {
    fn from(e: toml::ser::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_detection() {
        assert!(ClientError::Auth("expired".into()).is_auth());
        assert!(!ClientError::Network("down".into()).is_auth());
    }

    #[test]
    fn test_payment_message_carries_support_hint() {
        let err = ClientError::Payment {
            message: "Verification failed".into(),
            reference: Some("ref_123".into()),
        };
        let msg = err.user_message();
        assert!(msg.contains("ref_123"));
        assert!(msg.contains(SUPPORT_HINT));
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = ClientError::Validation("Message cannot be empty".into());
        assert_eq!(err.user_message(), "Message cannot be empty");
    }
}
