use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::CatalogConfig;
use crate::models::vote::CatalogEntryView;

pub const REPRESENTATIVE_ID_LEN: usize = 3;
pub const MAX_CHARITY_ID_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {kind} id {id:?}: {reason}")]
    InvalidId {
        kind: &'static str,
        id: String,
        reason: &'static str,
    },
    #[error("duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Representative {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Charity {
    pub id: String,
    pub name: String,
}

/// Representative and charity reference data. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    representatives: BTreeMap<String, Representative>,
    charities: BTreeMap<String, Charity>,
}

impl Catalogs {
    pub fn load(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let representatives: Vec<Representative> = read_json(&config.representatives_path)?;
        let charities: Vec<Charity> = read_json(&config.charities_path)?;
        let catalogs = Self::from_entries(representatives, charities)?;
        info!(
            representatives = catalogs.representatives.len(),
            charities = catalogs.charities.len(),
            "Reference catalogs loaded"
        );
        Ok(catalogs)
    }

    pub fn from_entries(
        representatives: Vec<Representative>,
        charities: Vec<Charity>,
    ) -> Result<Self, CatalogError> {
        let mut catalogs = Self::default();

        for representative in representatives {
            validate_representative_id(&representative.id)?;
            let id = representative.id.clone();
            if catalogs
                .representatives
                .insert(id.clone(), representative)
                .is_some()
            {
                return Err(CatalogError::Duplicate {
                    kind: "representative",
                    id,
                });
            }
        }

        for charity in charities {
            validate_charity_id(&charity.id)?;
            let id = charity.id.clone();
            if catalogs.charities.insert(id.clone(), charity).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "charity",
                    id,
                });
            }
        }

        Ok(catalogs)
    }

    /// Suspended representatives stay listed but cannot receive votes.
    pub fn has_representative(&self, id: &str) -> bool {
        self.representatives
            .get(id)
            .is_some_and(|representative| !representative.suspended)
    }

    pub fn has_charity(&self, id: &str) -> bool {
        self.charities.contains_key(id)
    }

    pub fn representative_views(&self) -> Vec<CatalogEntryView> {
        self.representatives
            .values()
            .map(|r| CatalogEntryView {
                id: r.id.clone(),
                name: r.name.clone(),
                profession: r.profession.clone(),
            })
            .collect()
    }

    pub fn charity_views(&self) -> Vec<CatalogEntryView> {
        self.charities
            .values()
            .map(|c| CatalogEntryView {
                id: c.id.clone(),
                name: c.name.clone(),
                profession: None,
            })
            .collect()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<Vec<T>, CatalogError> {
    let raw = std::fs::read_to_string(Path::new(path)).map_err(|source| CatalogError::Io {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
        path: path.to_string(),
        source,
    })
}

fn validate_representative_id(id: &str) -> Result<(), CatalogError> {
    if id.len() != REPRESENTATIVE_ID_LEN || !id.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(CatalogError::InvalidId {
            kind: "representative",
            id: id.to_string(),
            reason: "must be three upper-case ASCII letters",
        });
    }
    Ok(())
}

fn validate_charity_id(id: &str) -> Result<(), CatalogError> {
    if id.is_empty() || id.len() > MAX_CHARITY_ID_LEN {
        return Err(CatalogError::InvalidId {
            kind: "charity",
            id: id.to_string(),
            reason: "length out of bounds",
        });
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(CatalogError::InvalidId {
            kind: "charity",
            id: id.to_string(),
            reason: "must be upper-case ASCII alphanumerics",
        });
    }
    Ok(())
}
