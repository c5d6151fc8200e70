//! Response normalization.
//!
//! | Reply | Response |
//! |-------|----------|
//! | [`Reply::Text`], [`Reply::Number`], scalar `Value` | plain-text body |
//! | [`Reply::Value`], [`Reply::Record`] | JSON body |
//! | [`Reply::Model`] | validated, then JSON from its own serialization |
//! | [`Reply::Response`] | passed through unchanged |
//! | [`Reply::Empty`], `Value(null)` | empty body, `204 No Content` by default |
//! | [`Reply::Unknown`] | `403` with `{"error": "Unknown response format"}` |

use http::StatusCode;
use keystone_core::{ErrorEnvelope, KeystoneError, Reply, Response};

/// Converts replies into the response sent to the client.
#[derive(Debug, Clone, Copy)]
pub struct ResponseNormalizer {
    empty_status: StatusCode,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }
}

impl ResponseNormalizer {
    /// Creates a normalizer sending `empty_status` for empty replies.
    #[must_use]
    pub const fn new(empty_status: StatusCode) -> Self {
        Self { empty_status }
    }

    /// Writes `reply` into `response`.
    ///
    /// Returns the response to send: `response` itself, or the one carried by
    /// a [`Reply::Response`]. An empty reply leaves a response the handler
    /// already wrote untouched.
    pub fn normalize(&self, reply: Reply, response: &Response) -> Response {
        match reply {
            Reply::Text(text) | Reply::Value(serde_json::Value::String(text)) => {
                response.send(text);
            }
            Reply::Number(number) | Reply::Value(serde_json::Value::Number(number)) => {
                response.send(number.to_string());
            }
            Reply::Value(serde_json::Value::Bool(flag)) => {
                response.send(flag.to_string());
            }
            Reply::Value(serde_json::Value::Null) | Reply::Empty => {
                if !response.is_written() {
                    response.empty(self.empty_status);
                }
            }
            Reply::Value(value) | Reply::Record(value) => {
                response.json(&value);
            }
            Reply::Model(model) => match model.validate() {
                Err(fields) => {
                    let error =
                        KeystoneError::validation_with_fields("Response model is invalid", fields);
                    write_envelope(response, &error, error.to_envelope(None));
                }
                Ok(()) => match model.dump() {
                    Ok(value) => {
                        response.json(&value);
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to serialize response model");
                        write_envelope(response, &error, error.to_envelope(None));
                    }
                },
            },
            Reply::Response(built) => return built,
            Reply::Unknown(_) => {
                tracing::warn!("Handler returned a value of an unknown shape");
                response
                    .set_status(StatusCode::FORBIDDEN)
                    .json(&serde_json::json!({ "error": "Unknown response format" }));
            }
        }
        response.clone()
    }
}

/// Writes an error envelope with the error's status.
pub(crate) fn write_envelope(response: &Response, error: &KeystoneError, envelope: ErrorEnvelope) {
    let body = serde_json::to_value(&envelope).unwrap_or_else(|_| {
        serde_json::json!({
            "error": { "code": error.category().code(), "message": error.message() }
        })
    });
    response.set_status(error.status_code()).json(&body);
}
