// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload type -> callback identity resolution.
//!
//! The native library routes each invocation by a small integer identity.
//! Identities are assigned by an external table (usually generated from the
//! native SDK headers); cbrelay never computes them. The table is injected
//! into every dispatcher through the [`IdentityResolver`] trait.
//!
//! # Example
//!
//! ```ignore
//! let table = IdentityTable::new()
//!     .with::<Ping>(Identity::new(42))
//!     .with_name("SessionReady", Identity::new(101));
//! assert_eq!(table.identity_of(PayloadType::of::<Ping>())?, Identity::new(42));
//! ```

#[cfg(feature = "identity-loaders")]
mod yaml;

#[cfg(feature = "identity-loaders")]
pub use yaml::{YamlIdentity, YamlIdentityDocument, YamlLoader};

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::payload::Payload;

/// Callback identity as understood by the native library (`int` on the wire).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(i32);

impl Identity {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key identifying a payload type for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    pub fn of<T: Payload>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::TYPE_NAME,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Resolves payload types to identities.
pub trait IdentityResolver {
    /// Look up the identity of `ty`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownIdentity`] if the table has no entry for `ty`.
    fn identity_of(&self, ty: PayloadType) -> Result<Identity>;
}

/// In-memory identity table.
///
/// Entries keyed by Rust type take precedence over entries keyed by name.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    by_type: HashMap<TypeId, Identity>,
    by_name: HashMap<String, Identity>,
}

impl IdentityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `T`.
    #[must_use]
    pub fn with<T: Payload>(mut self, identity: Identity) -> Self {
        self.insert::<T>(identity);
        self
    }

    /// Add an entry by type name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>, identity: Identity) -> Self {
        self.insert_name(name, identity);
        self
    }

    pub fn insert<T: Payload>(&mut self, identity: Identity) -> Option<Identity> {
        self.by_type.insert(TypeId::of::<T>(), identity)
    }

    pub fn insert_name(&mut self, name: impl Into<String>, identity: Identity) -> Option<Identity> {
        self.by_name.insert(name.into(), identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len() + self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Named entries sorted by identity.
    pub fn named_entries(&self) -> Vec<(&str, Identity)> {
        let mut entries: Vec<_> = self
            .by_name
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
            .collect();
        entries.sort_by_key(|(name, id)| (*id, *name));
        entries
    }

    /// Check that no two named entries share an identity.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<Identity, &str> = HashMap::new();
        for (name, identity) in self.named_entries() {
            if let Some(previous) = seen.insert(identity, name) {
                return Err(Error::InvalidIdentityTable(format!(
                    "identity {} assigned to both '{}' and '{}'",
                    identity, previous, name
                )));
            }
        }
        Ok(())
    }
}

impl IdentityResolver for IdentityTable {
    fn identity_of(&self, ty: PayloadType) -> Result<Identity> {
        self.by_type
            .get(&ty.type_id())
            .or_else(|| self.by_name.get(ty.name()))
            .copied()
            .ok_or(Error::UnknownIdentity(ty.name()))
    }
}

impl<R: IdentityResolver + ?Sized> IdentityResolver for &R {
    fn identity_of(&self, ty: PayloadType) -> Result<Identity> {
        (**self).identity_of(ty)
    }
}
