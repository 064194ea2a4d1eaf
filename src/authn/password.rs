//! HTTP basic authentication against a `password,user,uid[,"groups"]` file.

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::path::Path;

use super::tokenfile::{read_records, user_from_record};
use super::{constant_time_eq, priority, AuthResult, AuthnError, RequestAuthenticator, Response, UserInfo};

struct Entry {
    password: String,
    user: UserInfo,
}

pub struct PasswordFileAuthenticator {
    users: HashMap<String, Entry>,
}

impl PasswordFileAuthenticator {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let mut users = HashMap::new();
        for record in read_records(path, 3)? {
            let user = user_from_record(&record, 1);
            let entry = Entry {
                password: record[0].clone(),
                user,
            };
            if users.insert(entry.user.name.clone(), entry).is_some() {
                tracing::warn!(file = %path.display(), "Duplicate user in password file");
            }
        }
        Ok(Self { users })
    }
}

#[async_trait]
impl RequestAuthenticator for PasswordFileAuthenticator {
    async fn authenticate_request(&self, req: &Parts) -> AuthResult {
        let Some(value) = req.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return Ok(None);
        };
        let Some((scheme, encoded)) = value.split_once(' ') else {
            return Ok(None);
        };
        if scheme != "Basic" {
            return Ok(None);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthnError::Malformed(format!("basic credentials: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| AuthnError::Malformed("basic credentials are not UTF-8".into()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| AuthnError::Malformed("invalid authorization message".into()))?;

        match self.users.get(username) {
            Some(entry) if constant_time_eq(entry.password.as_bytes(), password.as_bytes()) => {
                Ok(Some(Response::new(entry.user.clone())))
            }
            _ => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "password file authenticator"
    }

    fn priority(&self) -> i32 {
        priority::PASSWORD
    }
}
