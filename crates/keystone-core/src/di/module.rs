//! Module definitions.
//!
//! Modules group providers and decide which providers can see each other.
//! A provider owned by a module may inject:
//!
//! - any provider of its own module,
//! - the exports of every module it imports (all providers when the imported
//!   module declares no exports),
//! - any provider of a global or root module.

use super::Token;
use std::sync::Arc;

/// A module: a named group of providers and its visibility rules.
///
/// # Example
///
/// ```
/// use keystone_core::di::{ModuleDef, Token};
///
/// struct Database;
/// struct UserService;
///
/// let database = ModuleDef::new("database")
///     .provider(Token::of::<Database>())
///     .export(Token::of::<Database>())
///     .global();
///
/// let users = ModuleDef::new("users")
///     .provider(Token::of::<UserService>())
///     .import("database");
///
/// assert!(database.is_global());
/// assert_eq!(users.imports().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ModuleDef {
    name: Arc<str>,
    providers: Vec<Token>,
    controllers: Vec<Token>,
    imports: Vec<Arc<str>>,
    exports: Vec<Token>,
    global: bool,
    root: bool,
}

impl ModuleDef {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            controllers: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            global: false,
            root: false,
        }
    }

    /// Adds a provider owned by this module.
    #[must_use]
    pub fn provider(mut self, token: Token) -> Self {
        if !self.providers.contains(&token) {
            self.providers.push(token);
        }
        self
    }

    /// Adds a controller. Controllers are providers too.
    #[must_use]
    pub fn controller(mut self, token: Token) -> Self {
        if !self.controllers.contains(&token) {
            self.controllers.push(token.clone());
        }
        self.provider(token)
    }

    /// Imports another module by name.
    #[must_use]
    pub fn import(mut self, module: impl Into<Arc<str>>) -> Self {
        self.imports.push(module.into());
        self
    }

    /// Exports a provider to importing modules.
    #[must_use]
    pub fn export(mut self, token: Token) -> Self {
        self.exports.push(token);
        self
    }

    /// Makes every provider of this module visible everywhere.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Marks this module as the application root. Root providers are
    /// visible everywhere.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Returns the providers owned by this module.
    #[must_use]
    pub fn providers(&self) -> &[Token] {
        &self.providers
    }

    /// Returns the controllers of this module.
    #[must_use]
    pub fn controllers(&self) -> &[Token] {
        &self.controllers
    }

    /// Returns the names of imported modules.
    #[must_use]
    pub fn imports(&self) -> &[Arc<str>] {
        &self.imports
    }

    /// Returns the exported providers.
    #[must_use]
    pub fn exports(&self) -> &[Token] {
        &self.exports
    }

    /// Returns `true` for global modules.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.global
    }

    /// Returns `true` for the root module.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.root
    }

    /// Providers this module makes visible to importers.
    pub(crate) fn visible_to_importers(&self) -> &[Token] {
        if self.exports.is_empty() {
            &self.providers
        } else {
            &self.exports
        }
    }
}
