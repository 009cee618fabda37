//! JSON results delivered to host callbacks
//!
//! Every reply to the host has the shape `{"id", "method", "data", "code"}`.
//! One-shot replies release their callback handle after delivery; `"message"`
//! deliveries go to the long-lived event listener and keep it.

use crate::callbacks::HostCallbacks;
use crate::types::CallbackHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code for a successful action
pub const CODE_OK: i32 = 0;
/// Result code for a failed action
pub const CODE_ERROR: i32 = -1;

/// Name of a host-facing method
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Method(String);

impl Method {
    /// Method name used for unsolicited events sent to the listener
    pub const MESSAGE: &'static str = "message";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn message() -> Self {
        Self(Self::MESSAGE.to_string())
    }

    pub fn is_message(&self) -> bool {
        self.0 == Self::MESSAGE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of event pushed to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Log,
    Delay,
    Request,
    Memory,
    Connections,
}

/// Event pushed to the host listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: serde_json::Value,
}

impl Message {
    pub fn new(kind: MessageType, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    /// A log line as `{"level", "payload"}`
    pub fn log(level: log::Level, payload: impl Into<String>) -> Self {
        Self::new(
            MessageType::Log,
            serde_json::json!({
                "level": level.as_str().to_ascii_lowercase(),
                "payload": payload.into(),
            }),
        )
    }
}

/// Reply delivered through `invoke_result`
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult<T> {
    pub id: String,
    pub method: Method,
    pub data: T,
    pub code: i32,
}

impl<T: Serialize> ActionResult<T> {
    pub fn success(id: impl Into<String>, method: Method, data: T) -> Self {
        Self {
            id: id.into(),
            method,
            data,
            code: CODE_OK,
        }
    }

    /// Listener event with the `"message"` method and no id
    pub fn event(data: T) -> Self {
        Self::success(String::new(), Method::message(), data)
    }

    /// Serialise to JSON
    ///
    /// If `data` cannot be serialised the reply keeps its shape and carries the
    /// error text as data with `CODE_ERROR`.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("Failed to serialise {} result: {}", self.method, err);
                let fallback = ActionResult {
                    id: self.id.clone(),
                    method: self.method.clone(),
                    data: err.to_string(),
                    code: CODE_ERROR,
                };
                serde_json::to_string(&fallback).unwrap_or_else(|_| err.to_string())
            }
        }
    }

    /// Deliver to `callback`, releasing it afterwards unless this is a
    /// listener event
    pub fn send(&self, callbacks: &HostCallbacks, callback: CallbackHandle) {
        let json = self.to_json();
        callbacks.invoke_result(callback, &json);
        if !self.method.is_message() {
            callbacks.release_object(callback);
        }
    }
}

impl ActionResult<String> {
    pub fn failure(id: impl Into<String>, method: Method, error: impl fmt::Display) -> Self {
        Self {
            id: id.into(),
            method,
            data: error.to_string(),
            code: CODE_ERROR,
        }
    }
}
