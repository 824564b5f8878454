//! Decoding of the response envelope every Moku endpoint returns.
//!
//! A successful reply looks like `{"success": true, "data": ...}` and a failed
//! one like `{"success": false, "code": 400, "messages": ["..."]}`.

use serde_json::{Map, Value};

use crate::session::SessionError;

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// A decoded device response.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// `success == true`; carries the `data` field unmodified.
    Success(Value),
    /// `success == false`; carries the device's error code and messages.
    Failure { code: i64, messages: Vec<String> },
}

impl Envelope {
    /// Parses a response body into an envelope.
    ///
    /// Fails with [`SessionError::Decode`] if the body is not JSON, is not an
    /// object, or lacks the fields required for its `success` value.
    pub fn decode(body: &str) -> Result<Self, SessionError> {
        let parsed: Value = serde_json::from_str(body)
            .map_err(|err| SessionError::Decode(format!("response is not json: {err}")))?;
        let Value::Object(object) = parsed else {
            return Err(SessionError::Decode(
                "response is not a json object".to_string(),
            ));
        };

        Self::from_object(object)
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, SessionError> {
        let success = match object.get("success") {
            Some(Value::Bool(success)) => *success,
            Some(other) => {
                return Err(SessionError::Decode(format!(
                    "envelope `success` is not a boolean: {other}"
                )))
            }
            None => {
                return Err(SessionError::Decode(
                    "envelope missing `success`".to_string(),
                ))
            }
        };

        if success {
            let data = object
                .remove("data")
                .ok_or_else(|| SessionError::Decode("envelope missing `data`".to_string()))?;
            return Ok(Self::Success(data));
        }

        let code = object.get("code").and_then(Value::as_i64).ok_or_else(|| {
            SessionError::Decode("failure envelope missing integer `code`".to_string())
        })?;
        let messages = match object.remove("messages") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(message) => Some(message),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    SessionError::Decode("envelope `messages` must be strings".to_string())
                })?,
            _ => {
                return Err(SessionError::Decode(
                    "failure envelope missing `messages` array".to_string(),
                ))
            }
        };

        Ok(Self::Failure { code, messages })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the `data` field of a successful envelope.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Consumes the envelope, turning a failure into [`SessionError::Api`].
    pub fn into_data(self) -> Result<Value, SessionError> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure { code, messages } => Err(SessionError::Api { code, messages }),
        }
    }
}

/// Best-effort error messages for a response that was rejected at the HTTP
/// level. Prefers the envelope's `messages`, falling back to a body snippet.
pub(crate) fn failure_messages(body: &str) -> Vec<String> {
    if let Ok(Envelope::Failure { messages, .. }) = Envelope::decode(body) {
        if !messages.is_empty() {
            return messages;
        }
    }

    let snippet = summarize_body(body);
    if snippet.trim().is_empty() {
        Vec::new()
    } else {
        vec![snippet]
    }
}

pub(crate) fn summarize_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
