/*
[INPUT]:  Account selection config keys, injected credential blob
[OUTPUT]: Username/password pair presented at re-login
[POS]:    Session layer - credential resolution for the login step
[UPDATE]: When credential sources or blob format change
*/

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigStore, keys};

/// Credentials resolved for one login attempt
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Both fields present, so the login primitive may be invoked
    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn as_pair(&self) -> Option<(&str, &str)> {
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Newline-delimited `label:username[:password]` records
#[derive(Clone, Default)]
pub struct CredentialBlob {
    data: String,
}

impl CredentialBlob {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// First record that starts with `label`.
    ///
    /// A password is only taken from records with exactly three fields, so a
    /// password containing `:` resolves to none.
    pub fn lookup(&self, label: &str) -> Option<Credentials> {
        let line = self
            .data
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .find(|line| line.starts_with(label))?;

        let mut fields: Vec<&str> = line.split(':').collect();
        while fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }
        let username = fields.get(1).filter(|value| !value.is_empty())?;
        Some(Credentials {
            username: Some(username.to_string()),
            password: (fields.len() == 3).then(|| fields[2].to_string()),
        })
    }
}

impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBlob")
            .field("records", &self.data.lines().count())
            .finish()
    }
}

/// Chooses which account to log back into
#[derive(Clone)]
pub struct SessionSelector {
    config: Arc<dyn ConfigStore>,
    blob: Option<CredentialBlob>,
}

impl fmt::Debug for SessionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSelector")
            .field("blob", &self.blob)
            .finish_non_exhaustive()
    }
}

impl SessionSelector {
    pub fn new(config: Arc<dyn ConfigStore>, blob: Option<CredentialBlob>) -> Self {
        Self { config, blob }
    }

    /// Resolve credentials from the manual fields or the profile blob.
    ///
    /// Missing pieces come back as `None`; callers must check
    /// [`Credentials::is_complete`] before dispatching.
    pub fn resolve(&self) -> Credentials {
        if self.config.get_bool(keys::ACCOUNT_SELECTION) {
            return Credentials {
                username: self.non_blank(keys::MANUAL_USERNAME),
                password: self.non_blank(keys::MANUAL_PASSWORD),
            };
        }

        let Some(blob) = self.blob.as_ref() else {
            debug!("no credential blob configured");
            return Credentials::default();
        };
        let Some(label) = self.non_blank(keys::PROFILES_ACCOUNT) else {
            debug!("no profile account selected");
            return Credentials::default();
        };
        blob.lookup(&label).unwrap_or_else(|| {
            debug!(label = %label, "profile not found in credential blob");
            Credentials::default()
        })
    }

    fn non_blank(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .filter(|value| !value.trim().is_empty())
    }
}
