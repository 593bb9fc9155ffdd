// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML identity table loader.
//!
//! Native SDKs usually number their callbacks as `group base + offset`.
//! The YAML format mirrors that so tables can be transcribed straight from
//! the SDK headers.
//!
//! # Example YAML
//!
//! ```yaml
//! # identities.yaml
//! groups:
//!   user: 100
//!   matchmaking: 500
//!
//! identities:
//!   Ping: 42
//!   SessionReady: { group: user, offset: 1 }
//!   LobbyCreated: { group: matchmaking, offset: 13 }
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use super::{Identity, IdentityTable};
use crate::error::{Error, Result};

/// YAML identity table loader.
pub struct YamlLoader;

/// Root YAML document structure.
#[derive(Debug, Deserialize)]
pub struct YamlIdentityDocument {
    /// Named identity bases.
    #[serde(default)]
    pub groups: HashMap<String, i32>,

    /// Payload type name -> identity.
    #[serde(default)]
    pub identities: BTreeMap<String, YamlIdentity>,
}

/// A single identity entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum YamlIdentity {
    /// Absolute identity number.
    Absolute(i32),
    /// Offset from a named group base.
    Grouped { group: String, offset: i32 },
}

impl YamlLoader {
    /// Load and validate an identity table from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<IdentityTable> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ConfigFileNotFound(path.display().to_string())
            } else {
                Error::IoError(e)
            }
        })?;
        Self::parse_table(&content)
    }

    /// Parse YAML into the raw document without resolving groups.
    pub fn parse_yaml(yaml_content: &str) -> Result<YamlIdentityDocument> {
        serde_yaml::from_str(yaml_content)
            .map_err(|e| Error::InvalidIdentityTable(format!("YAML parse error: {}", e)))
    }

    /// Parse, resolve and validate an identity table.
    pub fn parse_table(yaml_content: &str) -> Result<IdentityTable> {
        let doc = Self::parse_yaml(yaml_content)?;
        Self::document_to_table(&doc)
    }

    pub fn document_to_table(doc: &YamlIdentityDocument) -> Result<IdentityTable> {
        let mut table = IdentityTable::new();

        for (name, entry) in &doc.identities {
            let raw = match entry {
                YamlIdentity::Absolute(raw) => *raw,
                YamlIdentity::Grouped { group, offset } => {
                    let base = doc.groups.get(group).ok_or_else(|| {
                        Error::InvalidIdentityTable(format!(
                            "'{}' references unknown group '{}'",
                            name, group
                        ))
                    })?;
                    base.checked_add(*offset).ok_or_else(|| {
                        Error::InvalidIdentityTable(format!("'{}' identity overflows", name))
                    })?
                }
            };
            table.insert_name(name.clone(), Identity::new(raw));
        }

        table.validate()?;
        log::debug!(
            "[identity] loaded {} identities from {} groups",
            table.len(),
            doc.groups.len()
        );
        Ok(table)
    }
}
