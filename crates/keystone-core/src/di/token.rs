//! Provider tokens.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A resolved provider instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A provider identity: either a type or a string key.
///
/// Type tokens compare by [`TypeId`]; named tokens compare by name.
#[derive(Clone)]
pub enum Token {
    /// A type identity.
    Type {
        /// The type's id.
        id: TypeId,
        /// The type's full name, for diagnostics.
        name: &'static str,
    },
    /// A string key.
    Named(Arc<str>),
}

impl Token {
    /// Returns the token for type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns a named token.
    #[must_use]
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    /// Returns the short, human-readable name of this token.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Type { name, .. } => short_type_name(name),
            Self::Named(name) => name,
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type { id: a, .. }, Self::Type { id: b, .. }) => a == b,
            (Self::Named(a), Self::Named(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Type { id, .. } => {
                0_u8.hash(state);
                id.hash(state);
            }
            Self::Named(name) => {
                1_u8.hash(state);
                name.hash(state);
            }
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type { name, .. } => write!(f, "Token({name})"),
            Self::Named(name) => write!(f, "Token({name:?})"),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&'static str> for Token {
    fn from(name: &'static str) -> Self {
        Self::named(name)
    }
}

/// Strips the module path (and generic arguments) from a type name.
///
/// ```
/// use keystone_core::di::short_type_name;
///
/// assert_eq!(short_type_name("app::guards::AuthGuard"), "AuthGuard");
/// assert_eq!(short_type_name("app::Repo<app::User>"), "Repo");
/// ```
#[must_use]
pub fn short_type_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct UserService;
    struct OrderService;

    #[test]
    fn test_type_tokens_compare_by_type() {
        assert_eq!(Token::of::<UserService>(), Token::of::<UserService>());
        assert_ne!(Token::of::<UserService>(), Token::of::<OrderService>());
    }

    #[test]
    fn test_named_tokens() {
        assert_eq!(Token::named("db"), Token::from("db"));
        assert_ne!(Token::named("UserService"), Token::of::<UserService>());
    }

    #[test]
    fn test_display_uses_short_name() {
        assert_eq!(Token::of::<UserService>().to_string(), "UserService");
        assert_eq!(Token::named("config").to_string(), "config");
    }

    #[test]
    fn test_hash_set_membership() {
        let set: HashSet<Token> = [Token::of::<UserService>(), Token::named("x")].into();
        assert!(set.contains(&Token::of::<UserService>()));
        assert!(set.contains(&Token::named("x")));
        assert!(!set.contains(&Token::of::<OrderService>()));
    }
}
