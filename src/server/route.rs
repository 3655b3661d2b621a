//! Per-route options: the transaction marker and the route's hook lists.

use crate::hooks::{HookList, RequestHook, add_handler};

/// Which database a route asks to run inside a request transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactMarker {
    /// The unnamed database.
    Default,
    /// The database registered under this name.
    Named(String),
}

impl TransactMarker {
    /// `None` for the default database.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }
}

/// Options attached to a route when it is added to the host.
///
/// On-route hooks receive these mutably before the router is built and
/// extend the hook lists with [`add_handler`].
pub struct RouteOptions<C> {
    pub transact: Option<TransactMarker>,
    pub pre_handler: HookList<RequestHook<C>>,
    pub on_error: HookList<RequestHook<C>>,
    pub on_send: HookList<RequestHook<C>>,
    claimed: bool,
}

impl<C> Default for RouteOptions<C> {
    fn default() -> Self {
        Self {
            transact: None,
            pre_handler: HookList::new(),
            on_error: HookList::new(),
            on_send: HookList::new(),
            claimed: false,
        }
    }
}

impl<C> Clone for RouteOptions<C> {
    fn clone(&self) -> Self {
        Self {
            transact: self.transact.clone(),
            pre_handler: self.pre_handler.clone(),
            on_error: self.on_error.clone(),
            on_send: self.on_send.clone(),
            claimed: self.claimed,
        }
    }
}

impl<C> std::fmt::Debug for RouteOptions<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteOptions")
            .field("transact", &self.transact)
            .field("pre_handler", &self.pre_handler)
            .field("on_error", &self.on_error)
            .field("on_send", &self.on_send)
            .finish()
    }
}

impl<C> RouteOptions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run each request in a transaction on the default database.
    pub fn transact(mut self) -> Self {
        self.transact = Some(TransactMarker::Default);
        self
    }

    /// Run each request in a transaction on the named database.
    ///
    /// An empty name selects the default database.
    pub fn transact_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.transact = Some(if name.is_empty() {
            TransactMarker::Default
        } else {
            TransactMarker::Named(name)
        });
        self
    }

    /// Whether the marker selects the registration called `name` (`None` = default).
    ///
    /// The default marker matches only the unnamed registration and a named
    /// marker matches only the registration with exactly that name.
    pub fn binds(&self, name: Option<&str>) -> bool {
        match (&self.transact, name) {
            (Some(TransactMarker::Default), None) => true,
            (Some(TransactMarker::Named(marker)), Some(name)) => marker == name,
            _ => false,
        }
    }

    /// Record that a registration has taken responsibility for the marker.
    pub fn claim(&mut self) {
        self.claimed = true;
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn add_pre_handler(&mut self, hook: RequestHook<C>) {
        self.pre_handler = add_handler(std::mem::take(&mut self.pre_handler), hook);
    }

    pub fn add_on_error(&mut self, hook: RequestHook<C>) {
        self.on_error = add_handler(std::mem::take(&mut self.on_error), hook);
    }

    pub fn add_on_send(&mut self, hook: RequestHook<C>) {
        self.on_send = add_handler(std::mem::take(&mut self.on_send), hook);
    }
}
