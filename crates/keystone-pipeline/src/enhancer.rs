//! References to guards, interceptors, middleware and filters.
//!
//! An enhancer is either a ready instance (a struct or a wrapped function) or
//! a provider token. Token-based enhancers are resolved through the
//! [`Container`] on every request, so singleton enhancers are constructed once
//! and transient ones are rebuilt each time.

use keystone_core::{Container, Instance, KeystoneError, Token};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Identity of an enhancer, used to de-duplicate lists.
///
/// Two instance enhancers are the same when they share an allocation, two
/// implementation enhancers when they share a type and label, and two
/// provider enhancers when they share a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnhancerId {
    /// An instance, identified by address.
    Instance(usize),
    /// An implementation type. Function enhancers are keyed on the function
    /// type, so the same `async fn` registered twice has one identity.
    Implementation {
        /// The implementing type.
        type_id: TypeId,
        /// The implementation label.
        label: &'static str,
    },
    /// A provider token.
    Provider(Token),
}

/// A guard, interceptor, middleware or filter reference.
pub enum Enhancer<T: ?Sized> {
    /// A ready instance.
    Instance(Arc<T>),
    /// A ready instance identified by its implementation type rather than
    /// its allocation.
    Implementation {
        /// The instance.
        instance: Arc<T>,
        /// The implementing type.
        type_id: TypeId,
        /// The implementation label.
        label: &'static str,
    },
    /// A provider resolved through the container.
    Provider {
        /// The provider token.
        token: Token,
        /// Converts the resolved instance to the enhancer trait object.
        cast: fn(Instance) -> Option<Arc<T>>,
        /// What kind of enhancer this is, for error messages.
        kind: &'static str,
    },
}

impl<T: ?Sized> Clone for Enhancer<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Instance(instance) => Self::Instance(Arc::clone(instance)),
            Self::Implementation {
                instance,
                type_id,
                label,
            } => Self::Implementation {
                instance: Arc::clone(instance),
                type_id: *type_id,
                label: *label,
            },
            Self::Provider { token, cast, kind } => Self::Provider {
                token: token.clone(),
                cast: *cast,
                kind: *kind,
            },
        }
    }
}

impl<T: ?Sized> fmt::Debug for Enhancer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.debug_tuple("Instance").field(&self.id()).finish(),
            Self::Implementation { label, .. } => {
                f.debug_tuple("Implementation").field(label).finish()
            }
            Self::Provider { token, kind, .. } => f
                .debug_struct("Provider")
                .field("token", token)
                .field("kind", kind)
                .finish(),
        }
    }
}

impl<T: ?Sized> Enhancer<T> {
    /// Returns the identity of this enhancer.
    #[must_use]
    pub fn id(&self) -> EnhancerId {
        match self {
            Self::Instance(instance) => {
                EnhancerId::Instance(Arc::as_ptr(instance).cast::<()>() as usize)
            }
            Self::Implementation { type_id, label, .. } => EnhancerId::Implementation {
                type_id: *type_id,
                label: *label,
            },
            Self::Provider { token, .. } => EnhancerId::Provider(token.clone()),
        }
    }

    /// Returns the provider token, for token-based enhancers.
    #[must_use]
    pub const fn token(&self) -> Option<&Token> {
        match self {
            Self::Instance(_) | Self::Implementation { .. } => None,
            Self::Provider { token, .. } => Some(token),
        }
    }

    /// Resolves this reference to an instance.
    ///
    /// A provider that resolves to something other than the expected
    /// enhancer kind is a configuration error.
    pub async fn resolve(&self, container: &Container) -> Result<Arc<T>, KeystoneError> {
        match self {
            Self::Instance(instance) | Self::Implementation { instance, .. } => {
                Ok(Arc::clone(instance))
            }
            Self::Provider { token, cast, kind } => {
                let instance = container.get(token).await?;
                cast(instance).ok_or_else(|| {
                    KeystoneError::configuration(format!("{token} is not a valid {kind}"))
                })
            }
        }
    }
}

/// Keeps the first occurrence of every enhancer, preserving order.
#[must_use]
pub fn dedup<T: ?Sized>(enhancers: Vec<Enhancer<T>>) -> Vec<Enhancer<T>> {
    let mut seen = Vec::with_capacity(enhancers.len());
    enhancers
        .into_iter()
        .filter(|enhancer| {
            let id = enhancer.id();
            if seen.contains(&id) {
                false
            } else {
                seen.push(id);
                true
            }
        })
        .collect()
}

/// Resolves every reference, in order.
pub async fn resolve_all<T: ?Sized>(
    enhancers: &[Enhancer<T>],
    container: &Container,
) -> Result<Vec<Arc<T>>, KeystoneError> {
    let mut resolved = Vec::with_capacity(enhancers.len());
    for enhancer in enhancers {
        resolved.push(enhancer.resolve(container).await?);
    }
    Ok(resolved)
}
