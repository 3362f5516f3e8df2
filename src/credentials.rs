// src/credentials.rs
//! Per-student LMS credentials, keyed by the student's short name.
//!
//! ```json
//! { "deng": { "api_key": "...", "domain": "lms.example.edu", "user_id": 12345,
//!             "student_name": "Caihaoxuan Deng" } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentCredential {
    #[serde(skip)]
    pub key: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub domain: String,
    /// Integer or numeric string in the file.
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    /// LMS display name, when known.
    #[serde(default)]
    pub student_name: Option<String>,
}

impl StudentCredential {
    pub fn user_id(&self) -> Option<u64> {
        match self.user_id.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.student_name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(&self.key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::credential(&self.key, "missing api_key"));
        }
        if self.domain.trim().is_empty() {
            return Err(Error::credential(&self.key, "missing domain"));
        }
        if self.user_id().is_none() {
            return Err(Error::credential(&self.key, "missing or non-integer user_id"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    students: BTreeMap<String, StudentCredential>,
}

impl CredentialStore {
    pub fn from_json_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            warn!("credentials file is empty");
            return Ok(Self::default());
        }
        let mut students: BTreeMap<String, StudentCredential> =
            serde_json::from_str(text).map_err(|e| Error::credential("system", format!("invalid credentials JSON: {e}")))?;
        for (key, cred) in students.iter_mut() {
            cred.key = key.clone();
        }
        Ok(Self { students })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::credential("system", format!("{}: {e}", path.display())))?;
        let store = Self::from_json_str(&text)?;
        debug!(path = %path.display(), students = store.len(), "credentials loaded");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&StudentCredential> {
        self.students.get(key)
    }

    /// Key order.
    pub fn students(&self) -> impl Iterator<Item = &StudentCredential> {
        self.students.values()
    }
}
