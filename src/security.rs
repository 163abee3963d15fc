//! Authorization hook consulted before anything reaches the store.
use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::warn;

use crate::datatype::OtherHasher;
use crate::error::{FcError, Result};
use crate::instruction::{Accessed, PropertyKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Create,
    Update,
    Delete,
    Query,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AccessKind::Create => "create",
            AccessKind::Update => "update",
            AccessKind::Delete => "delete",
            AccessKind::Query => "query",
        };
        write!(f, "{}", name)
    }
}

/// Receives every compiled instruction and query with the properties it
/// touches. Returning an error vetoes the whole batch or query.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, kind: AccessKind, accessed: &Accessed) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _kind: AccessKind, _accessed: &Accessed) -> Result<()> {
        Ok(())
    }
}

/// Denies listed properties per access kind, allows everything else.
#[derive(Debug, Default, Clone)]
pub struct DenyProperties {
    denied: HashMap<AccessKind, HashSet<PropertyKey, OtherHasher>, OtherHasher>,
}

impl DenyProperties {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn deny(mut self, kind: AccessKind, entity: &str, property: &str) -> Self {
        self.denied
            .entry(kind)
            .or_default()
            .insert(PropertyKey::new(entity, property));
        self
    }
}

impl Authorizer for DenyProperties {
    fn authorize(&self, kind: AccessKind, accessed: &Accessed) -> Result<()> {
        let Some(denied) = self.denied.get(&kind) else {
            return Ok(());
        };
        if let Some(key) = accessed.iter().find(|k| denied.contains(*k)) {
            warn!(kind = %kind, property = %key, "access denied");
            return Err(FcError::Authorization(format!("No {} access to {}", kind, key)));
        }
        Ok(())
    }
}
