// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Uid-keyed factories for SUTs and annotators.
//!
//! The embedding application registers a constructor per uid, along with the
//! secrets that constructor needs. The runner checks for missing secrets
//! *before* constructing anything, so a misconfigured run fails fast rather
//! than half-way through.

use crate::error::ConfigError;
use crate::secrets::{RawSecrets, SecretDescription, missing_secrets};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type Maker<T> = Box<dyn Fn(&RawSecrets) -> Result<Arc<T>, ConfigError> + Send + Sync>;

struct FactoryEntry<T: ?Sized> {
    required_secrets: Vec<SecretDescription>,
    make: Maker<T>,
}

/// A registry of constructors keyed by uid.
///
/// `T` is typically `dyn Sut` or `dyn Annotator`.
pub struct InstanceFactory<T: ?Sized> {
    kind: &'static str,
    entries: RwLock<BTreeMap<String, FactoryEntry<T>>>,
}

impl<T: ?Sized> InstanceFactory<T> {
    /// Creates an empty factory; `kind` names what it makes in error
    /// messages.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        InstanceFactory {
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a constructor under `uid`, replacing any previous one.
    pub fn register<F>(&self, uid: &str, required_secrets: Vec<SecretDescription>, make: F)
    where
        F: Fn(&RawSecrets) -> Result<Arc<T>, ConfigError> + Send + Sync + 'static,
    {
        let _ = self.entries.write().insert(
            uid.to_owned(),
            FactoryEntry {
                required_secrets,
                make: Box::new(make),
            },
        );
    }

    /// The secrets `uid` needs but `secrets` does not provide.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownUid`] when `uid` is not registered.
    pub fn missing_dependencies(
        &self,
        uid: &str,
        secrets: &RawSecrets,
    ) -> Result<Vec<SecretDescription>, ConfigError> {
        let entries = self.entries.read();
        let entry = entries.get(uid).ok_or_else(|| ConfigError::UnknownUid {
            kind: self.kind,
            uid: uid.to_owned(),
        })?;
        Ok(missing_secrets(&entry.required_secrets, secrets))
    }

    /// Constructs the instance registered under `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownUid`] for unregistered uids and
    /// [`ConfigError::MissingSecrets`] before calling the constructor when
    /// required secrets are absent.
    pub fn make_instance(&self, uid: &str, secrets: &RawSecrets) -> Result<Arc<T>, ConfigError> {
        let missing = self.missing_dependencies(uid, secrets)?;
        if !missing.is_empty() {
            return Err(ConfigError::MissingSecrets(missing));
        }
        let entries = self.entries.read();
        let entry = entries.get(uid).ok_or_else(|| ConfigError::UnknownUid {
            kind: self.kind,
            uid: uid.to_owned(),
        })?;
        (entry.make)(secrets)
    }

    /// All registered uids, sorted.
    #[must_use]
    pub fn known_uids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}
