//! Handler return values.

use crate::error::{FieldErrors, KeystoneError};
use crate::response::Response;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A schema-validated model that serializes itself.
///
/// # Example
///
/// ```
/// use keystone_core::{FieldErrors, KeystoneError, Model};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct User {
///     name: String,
/// }
///
/// impl Model for User {
///     fn validate(&self) -> Result<(), FieldErrors> {
///         let mut errors = FieldErrors::new();
///         if self.name.is_empty() {
///             errors.add("name", "must not be empty");
///         }
///         if errors.is_empty() { Ok(()) } else { Err(errors) }
///     }
///
///     fn dump(&self) -> Result<serde_json::Value, KeystoneError> {
///         serde_json::to_value(self).map_err(KeystoneError::from_error)
///     }
/// }
/// ```
pub trait Model: Send + Sync + 'static {
    /// Validates the model before it is serialized.
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }

    /// Serializes the model.
    fn dump(&self) -> Result<serde_json::Value, KeystoneError>;
}

/// Everything a handler, interceptor, middleware or filter may return.
///
/// The response normalizer turns a `Reply` into the response sent to the
/// client.
pub enum Reply {
    /// Plain text.
    Text(String),
    /// A number, sent as plain text.
    Number(serde_json::Number),
    /// An untyped JSON value. Lists and mappings are sent as JSON, scalars
    /// as plain text.
    Value(serde_json::Value),
    /// A plain structured record, already reflected into its fields.
    Record(serde_json::Value),
    /// A schema-validated model.
    Model(Arc<dyn Model>),
    /// An already-built response.
    Response(Response),
    /// Nothing.
    Empty,
    /// A value of a type the normalizer does not understand.
    Unknown(Box<dyn Any + Send + Sync>),
}

impl Reply {
    /// Creates a text reply.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates an untyped JSON reply.
    #[must_use]
    pub const fn json(value: serde_json::Value) -> Self {
        Self::Value(value)
    }

    /// Reflects a plain struct into a record reply.
    pub fn record<T: Serialize>(record: &T) -> Result<Self, KeystoneError> {
        serde_json::to_value(record)
            .map(Self::Record)
            .map_err(KeystoneError::from_error)
    }

    /// Creates a model reply.
    pub fn model<M: Model>(model: M) -> Self {
        Self::Model(Arc::new(model))
    }

    /// Wraps a value of an arbitrary type.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Unknown(Box::new(value))
    }

    /// Returns `true` for [`Reply::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the variant name, for logging.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Value(_) => "value",
            Self::Record(_) => "record",
            Self::Model(_) => "model",
            Self::Response(_) => "response",
            Self::Empty => "empty",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Number(number) => f.debug_tuple("Number").field(number).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Record(value) => f.debug_tuple("Record").field(value).finish(),
            Self::Model(_) => f.write_str("Model(..)"),
            Self::Response(response) => f.debug_tuple("Response").field(response).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::Unknown(_) => f.write_str("Unknown(..)"),
        }
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

macro_rules! reply_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Reply {
                fn from(number: $ty) -> Self {
                    Self::Number(serde_json::Number::from(number))
                }
            }
        )*
    };
}

reply_from_number!(i32, i64, u32, u64, usize);

impl From<f64> for Reply {
    fn from(number: f64) -> Self {
        serde_json::Number::from_f64(number)
            .map_or_else(|| Self::Text(number.to_string()), Self::Number)
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<()> for Reply {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}
