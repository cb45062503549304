//! Credential store: username/password rows loaded from a whitespace-
//! delimited file, with single-session reservation per row.

use std::path::Path;

use tokio::sync::Mutex;

use crate::params::*;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AuthError {
    Io(std::io::Error),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Io(e) => write!(f, "credential file: {}", e),
        }
    }
}
impl std::error::Error for AuthError {}

// ─── Store ──────────────────────────────────────────────────────────

/// Result of a login attempt. `Succ` carries the reserved row index,
/// which the session must hand back on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Fail,
    Succ { id: usize },
    Used,
}

struct Credential {
    username: String,
    password: String,
}

/// Rows are immutable after load; only the reservation bitmap mutates,
/// and only under its mutex. At most one session holds a given row.
pub struct CredentialStore {
    rows: Vec<Credential>,
    in_use: Mutex<Vec<bool>>,
}

impl CredentialStore {
    /// Load from the credential file. The first line is a header and is
    /// skipped; each following line is `username<ws>password`. Rows past
    /// the account cap are ignored. A missing file yields an empty
    /// store (every login fails), matching the original's warn-and-run.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let text = std::fs::read_to_string(path).map_err(AuthError::Io)?;
        let mut rows = Vec::new();
        for line in text.lines().skip(1) {
            let mut fields = line.split_whitespace();
            let (Some(username), Some(password)) = (fields.next(), fields.next()) else {
                continue;
            };
            rows.push(Credential {
                username: username.to_string(),
                password: password.to_string(),
            });
            if rows.len() == NUM_ACCOUNTS {
                break;
            }
        }
        Ok(Self::from_rows(rows))
    }

    /// Store with no rows: every login fails.
    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    fn from_rows(rows: Vec<Credential>) -> Self {
        let in_use = vec![false; rows.len()];
        CredentialStore {
            rows,
            in_use: Mutex::new(in_use),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact byte-match of both fields, then reserve the row if free.
    pub async fn check(&self, username: &str, password: &str) -> AuthStatus {
        for (i, row) in self.rows.iter().enumerate() {
            if row.username != username || row.password != password {
                continue;
            }
            let mut in_use = self.in_use.lock().await;
            if in_use[i] {
                return AuthStatus::Used;
            }
            in_use[i] = true;
            return AuthStatus::Succ { id: i };
        }
        AuthStatus::Fail
    }

    /// Hand a reserved row back. Runs on every session exit path.
    pub async fn release(&self, id: usize) {
        let mut in_use = self.in_use.lock().await;
        if let Some(slot) = in_use.get_mut(id) {
            *slot = false;
        }
    }
}
