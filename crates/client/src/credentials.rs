//! Credential providers consulted before every connection attempt.
//!
//! The realtime client never owns the session. It asks a
//! [`CredentialProvider`] for a bearer token each time it opens a socket, so
//! a token refreshed elsewhere in the console is picked up on the next
//! reconnect.

use serde::{Deserialize, Serialize};

use crate::storage::Storage;

const SESSION_KEY: &str = "session";

/// Source of the bearer token attached to the socket handshake.
pub trait CredentialProvider: Send + Sync {
    /// The current token, or `None` when the user is not signed in.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token, typically from the environment.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Persisted session, `{"token": "..."}`. Other fields written by the
/// console are ignored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub token: String,
}

/// Reads the token from the session persisted by the console login flow.
///
/// The file is re-read on every call.
#[derive(Debug, Clone)]
pub struct SessionFile {
    storage: Storage,
}

impl SessionFile {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Session file in the platform config directory.
    pub fn default_location() -> Option<Self> {
        Storage::default_location().map(Self::new)
    }

    pub fn load(&self) -> Option<StoredSession> {
        self.storage.load(SESSION_KEY)
    }

    pub fn store(&self, session: &StoredSession) -> bool {
        self.storage.save(SESSION_KEY, session)
    }

    pub fn clear(&self) {
        self.storage.remove(SESSION_KEY);
    }
}

impl CredentialProvider for SessionFile {
    fn token(&self) -> Option<String> {
        self.load().map(|session| session.token)
    }
}

/// Why a provided token cannot be used.
pub(crate) fn validate_token(token: Option<String>) -> Result<String, &'static str> {
    let token = token.ok_or("no session token available")?;
    if token.is_empty() {
        return Err("session token is empty");
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("session token contains whitespace or control characters");
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn closures_are_providers() {
        let provider = || Some("abc".to_string());
        assert_eq!(provider.token().as_deref(), Some("abc"));
    }

    #[test]
    fn static_token_hides_value_in_debug() {
        let token = StaticToken::new("secret");
        assert_eq!(format!("{token:?}"), "StaticToken(..)");
        assert_eq!(token.token().as_deref(), Some("secret"));
    }

    #[test]
    fn session_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = SessionFile::new(Storage::at(tmp.path()));
        assert_eq!(sessions.token(), None);

        let session = StoredSession {
            token: "tok-1".into(),
        };
        assert!(sessions.store(&session));
        assert_eq!(sessions.load(), Some(session));
        assert_eq!(sessions.token().as_deref(), Some("tok-1"));

        sessions.clear();
        assert_eq!(sessions.token(), None);
    }

    #[rstest]
    #[case::token_only(r#"{"token":"tok-1"}"#)]
    #[case::extra_fields(r#"{"user_id":"dispatcher@ops","token":"tok-1"}"#)]
    fn session_file_reads_token_from_console_session(#[case] contents: &str) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("session.json"), contents).unwrap();

        let sessions = SessionFile::new(Storage::at(tmp.path()));
        assert_eq!(sessions.token().as_deref(), Some("tok-1"));
    }

    #[rstest]
    #[case::missing(None)]
    #[case::empty(Some(""))]
    #[case::spaces(Some("abc def"))]
    #[case::newline(Some("abc\n"))]
    fn invalid_tokens_are_rejected(#[case] token: Option<&str>) {
        assert!(validate_token(token.map(str::to_string)).is_err());
    }

    #[test]
    fn valid_token_passes_through() {
        assert_eq!(validate_token(Some("eyJhbGciOi.x-y_z".into())), Ok("eyJhbGciOi.x-y_z".into()));
    }
}
