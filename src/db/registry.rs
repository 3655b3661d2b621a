//! Named registry of databases.
//!
//! Holds at most one default database plus any number of named ones. Written
//! only during startup through `&mut`; shared read-only afterwards.

use crate::db::database::Database;
use crate::db::driver::Pool;
use crate::error::{DbError, DbResult};
use std::collections::BTreeMap;
use tracing::debug;

/// Names that collide with fields of the database handle.
pub const RESERVED_NAMES: &[&str] = &["connect", "pool", "Client", "query", "transact"];

#[derive(Debug)]
pub struct Registry<P> {
    default: Option<Database<P>>,
    named: BTreeMap<String, Database<P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            default: None,
            named: BTreeMap::new(),
        }
    }
}

impl<P: Pool> Registry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a database could be registered under `name` without registering it.
    pub fn ensure_available(&self, name: Option<&str>) -> DbResult<()> {
        match name.filter(|n| !n.is_empty()) {
            None if self.default.is_some() => Err(DbError::DuplicateDefault),
            None => Ok(()),
            Some(name) if RESERVED_NAMES.contains(&name) => Err(DbError::reserved_name(name)),
            Some(name) if self.named.contains_key(name) => Err(DbError::duplicate_name(name)),
            Some(_) => Ok(()),
        }
    }

    /// Register `database` under its own name, or as the default when unnamed.
    pub fn register(&mut self, database: Database<P>) -> DbResult<()> {
        self.ensure_available(database.name())?;
        debug!(database = %database.display_name(), "Registry entry added");
        match database.name().map(String::from) {
            Some(name) => {
                self.named.insert(name, database);
            }
            None => self.default = Some(database),
        }
        Ok(())
    }

    /// Look up a database; `None` (or `""`) selects the default.
    pub fn lookup(&self, name: Option<&str>) -> DbResult<&Database<P>> {
        let found = match name.filter(|n| !n.is_empty()) {
            Some(name) => self.named.get(name),
            None => self.default.as_ref(),
        };
        found.ok_or_else(|| DbError::not_found(name))
    }

    pub fn default_database(&self) -> Option<&Database<P>> {
        self.default.as_ref()
    }

    pub fn contains(&self, name: Option<&str>) -> bool {
        self.lookup(name).is_ok()
    }

    /// Registered names in order; the default is not included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    /// Every registered database, default first.
    pub fn iter(&self) -> impl Iterator<Item = &Database<P>> {
        self.default.iter().chain(self.named.values())
    }

    pub fn len(&self) -> usize {
        self.named.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
