//! Authentication credentials.

use base64::Engine;

/// Username/password credentials.
///
/// Sent as HTTP Basic authorization on the websocket upgrade, and replayed
/// as SASL PLAIN when the server answers a request with an authenticate
/// challenge.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub username: String,
    pub password: String,
}

impl AuthInfo {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> AuthInfo {
        AuthInfo {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value for the upgrade request.
    pub(crate) fn header_value(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header() {
        let auth = AuthInfo::basic("stephen", "password");
        // base64("stephen:password")
        assert_eq!(auth.header_value(), "Basic c3RlcGhlbjpwYXNzd29yZA==");
    }
}
