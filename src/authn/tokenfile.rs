//! Static token file: `token,user,uid[,"group1,group2"]` per line.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{priority, Audiences, AuthResult, Response, TokenAuthenticator, UserInfo};

/// Split one CSV record. Fields may be double-quoted; `""` escapes a quote.
pub(crate) fn parse_csv_record(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        match c {
            '"' if at_field_start => {
                quoted = true;
                at_field_start = false;
            }
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                    if !matches!(chars.peek(), None | Some(',')) {
                        return Err(format!("unexpected character after closing quote in {line:?}"));
                    }
                }
            }
            ',' if !quoted => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            c => {
                field.push(c);
                at_field_start = false;
            }
        }
    }
    if quoted {
        return Err(format!("unterminated quoted field in {line:?}"));
    }
    fields.push(field);
    Ok(fields)
}

/// Read a CSV credential file, skipping blank lines.
pub(crate) fn read_records(path: &Path, min_columns: usize) -> Result<Vec<Vec<String>>, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_csv_record(line)
            .map_err(|e| format!("{} line {}: {e}", path.display(), index + 1))?;
        if record.len() < min_columns {
            return Err(format!(
                "{} line {}: must have at least {min_columns} columns",
                path.display(),
                index + 1
            ));
        }
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn user_from_record(record: &[String], name_col: usize) -> UserInfo {
    let mut user = UserInfo {
        name: record[name_col].clone(),
        uid: record.get(name_col + 1).cloned().unwrap_or_default(),
        ..UserInfo::default()
    };
    if let Some(groups) = record.get(name_col + 2) {
        for group in groups.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            user.add_group(group);
        }
    }
    user
}

/// Authenticates tokens listed in a static file.
pub struct TokenFileAuthenticator {
    tokens: HashMap<String, UserInfo>,
}

impl TokenFileAuthenticator {
    pub fn new(tokens: HashMap<String, UserInfo>) -> Self {
        Self { tokens }
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let mut tokens = HashMap::new();
        for record in read_records(path, 3)? {
            let token = record[0].trim().to_string();
            if token.is_empty() {
                tracing::warn!(file = %path.display(), "Skipping empty token");
                continue;
            }
            let user = user_from_record(&record, 1);
            if tokens.insert(token, user).is_some() {
                tracing::warn!(file = %path.display(), "Duplicate token, later entry wins");
            }
        }
        tracing::info!(file = %path.display(), count = tokens.len(), "Loaded static tokens");
        Ok(Self { tokens })
    }
}

#[async_trait]
impl TokenAuthenticator for TokenFileAuthenticator {
    async fn authenticate_token(&self, token: &str, _audiences: Option<&Audiences>) -> AuthResult {
        Ok(self.tokens.get(token).cloned().map(Response::new))
    }

    fn name(&self) -> &str {
        "token file authenticator"
    }

    fn priority(&self) -> i32 {
        priority::TOKEN_FILE
    }
}
