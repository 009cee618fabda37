//! Action intake from the host
//!
//! The host calls in with a callback handle and a JSON envelope
//! `{"id", "method", "data"}`. Exactly one reply goes back through the
//! callback, whether the envelope is malformed, the handler answers, or the
//! handler panics.

use crate::callbacks::HostCallbacks;
use crate::result::{ActionResult, Method};
use crate::types::{CallbackHandle, HostString, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Request envelope sent by the host
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Action {
    pub fn from_json(params: &str) -> Result<Self> {
        Ok(serde_json::from_str(params)?)
    }

    /// Successful reply echoing this action's id and method
    pub fn reply<T: Into<serde_json::Value>>(&self, data: T) -> ActionResult<serde_json::Value> {
        ActionResult::success(self.id.clone(), self.method.clone(), data.into())
    }

    /// Failed reply echoing this action's id and method
    pub fn fail(&self, error: impl std::fmt::Display) -> ActionResult<serde_json::Value> {
        let mut result = self.reply(error.to_string());
        result.code = crate::result::CODE_ERROR;
        result
    }
}

/// What a handler hands back: the reply plus an optional side effect that
/// runs once the reply has been delivered
pub struct Dispatched {
    pub response: ActionResult<serde_json::Value>,
    after_send: Option<Box<dyn FnOnce() + Send>>,
}

impl Dispatched {
    pub fn new(response: ActionResult<serde_json::Value>) -> Self {
        Self {
            response,
            after_send: None,
        }
    }

    pub fn after_send(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.after_send = Some(Box::new(f));
        self
    }
}

impl From<ActionResult<serde_json::Value>> for Dispatched {
    fn from(response: ActionResult<serde_json::Value>) -> Self {
        Self::new(response)
    }
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("response", &self.response)
            .field("after_send", &self.after_send.is_some())
            .finish()
    }
}

/// Decode `params`, run `handler` and deliver its reply to `callback`
///
/// `params` is a host string and goes back through `free_string`; null reads
/// as an empty envelope. A malformed envelope gets an error reply with empty
/// id and method. A panicking handler gets a `"panic recovered: .."` reply
/// carrying the action's id and method. The callback is released after the
/// reply as for any one-shot result.
pub fn invoke_action<F>(
    callbacks: &HostCallbacks,
    callback: CallbackHandle,
    params: Option<HostString>,
    handler: F,
) where
    F: FnOnce(&Action) -> Dispatched,
{
    let params = params
        .map(|s| callbacks.take_string(s))
        .unwrap_or_default();

    let action = match Action::from_json(&params) {
        Ok(action) => action,
        Err(err) => {
            log::warn!("Rejecting malformed action: {}", err);
            ActionResult::failure(String::new(), Method::default(), err).send(callbacks, callback);
            return;
        }
    };
    log::debug!("Dispatching action {} ({})", action.method, action.id);

    let dispatched = match panic::catch_unwind(AssertUnwindSafe(|| handler(&action))) {
        Ok(dispatched) => dispatched,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            log::error!("Handler for {} panicked: {}", action.method, reason);
            ActionResult::failure(
                action.id.clone(),
                action.method.clone(),
                format!("panic recovered: {}", reason),
            )
            .send(callbacks, callback);
            return;
        }
    };

    dispatched.response.send(callbacks, callback);

    if let Some(after_send) = dispatched.after_send {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(after_send)) {
            log::error!(
                "Post-reply step for {} panicked: {}",
                action.method,
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BridgeError;
    use std::ffi::CString;
    use std::sync::{Arc, Mutex};

    fn recording_callbacks() -> (HostCallbacks, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let results = Arc::clone(&events);
        let releases = Arc::clone(&events);
        let frees = Arc::clone(&events);
        let callbacks = HostCallbacks::new()
            .with_invoke_result(move |_, data| results.lock().unwrap().push(data.to_string()))
            .with_release_object(move |obj| {
                releases.lock().unwrap().push(format!("release {:#x}", obj.addr()))
            })
            .with_free_string(move |s| {
                let text = unsafe { CString::from_raw(s.into_raw()) };
                frees
                    .lock()
                    .unwrap()
                    .push(format!("free {}", text.to_string_lossy()))
            });
        (callbacks, events)
    }

    fn params(json: &str) -> Option<HostString> {
        unsafe { HostString::from_raw(CString::new(json).unwrap().into_raw()) }
    }

    #[test]
    fn test_action_decoding() {
        let action = Action::from_json(r#"{"id":"4","method":"getProxies","data":{"a":1}}"#)
            .unwrap();
        assert_eq!(action.id, "4");
        assert_eq!(action.method.as_str(), "getProxies");
        assert_eq!(action.data, serde_json::json!({"a": 1}));

        let bare = Action::from_json(r#"{"method":"forceGc"}"#).unwrap();
        assert_eq!(bare.id, "");
        assert!(bare.data.is_null());

        assert!(matches!(Action::from_json("{"), Err(BridgeError::Json(_))));
    }

    #[test]
    fn test_handler_reply_is_delivered_then_after_send_runs() {
        let (callbacks, events) = recording_callbacks();
        let after = Arc::clone(&events);

        invoke_action(
            &callbacks,
            CallbackHandle::from_addr(0x50),
            params(r#"{"id":"1","method":"getVersion"}"#),
            |action| {
                Dispatched::new(action.reply("1.2.3"))
                    .after_send(move || after.lock().unwrap().push("after".to_string()))
            },
        );

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                r#"free {"id":"1","method":"getVersion"}"#.to_string(),
                r#"{"id":"1","method":"getVersion","data":"1.2.3","code":0}"#.to_string(),
                "release 0x50".to_string(),
                "after".to_string(),
            ]
        );
    }

    #[test]
    fn test_malformed_params_reply_with_error() {
        let (callbacks, events) = recording_callbacks();
        let mut called = false;

        invoke_action(
            &callbacks,
            CallbackHandle::from_addr(0x51),
            params("not json"),
            |action| {
                called = true;
                action.reply(true).into()
            },
        );

        assert!(!called);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], "free not json");
        let reply: serde_json::Value = serde_json::from_str(&events[1]).unwrap();
        assert_eq!(reply["id"], "");
        assert_eq!(reply["method"], "");
        assert_eq!(reply["code"], -1);
        assert!(reply["data"].as_str().unwrap().contains("expected"));
        assert_eq!(events[2], "release 0x51");
    }

    #[test]
    fn test_null_params_is_malformed() {
        let (callbacks, events) = recording_callbacks();
        invoke_action(&callbacks, CallbackHandle::from_addr(0x52), None, |action| {
            action.reply(true).into()
        });

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let reply: serde_json::Value = serde_json::from_str(&events[0]).unwrap();
        assert_eq!(reply["code"], -1);
        assert_eq!(events[1], "release 0x52");
    }

    #[test]
    fn test_panicking_handler_replies_once() {
        let (callbacks, events) = recording_callbacks();

        invoke_action(
            &callbacks,
            CallbackHandle::from_addr(0x53),
            params(r#"{"id":"9","method":"crash"}"#),
            |_| -> Dispatched { panic!("handler exploded") },
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        let reply: serde_json::Value = serde_json::from_str(&events[1]).unwrap();
        assert_eq!(
            reply,
            serde_json::json!({
                "id": "9",
                "method": "crash",
                "data": "panic recovered: handler exploded",
                "code": -1
            })
        );
        assert_eq!(events[2], "release 0x53");
    }

    #[test]
    fn test_panicking_after_send_does_not_reply_again() {
        let (callbacks, events) = recording_callbacks();

        invoke_action(
            &callbacks,
            CallbackHandle::from_addr(0x54),
            params(r#"{"id":"2","method":"crash"}"#),
            |action| Dispatched::new(action.reply(true)).after_send(|| panic!("after reply")),
        );

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            r#"{"id":"2","method":"crash","data":true,"code":0}"#
        );
        assert_eq!(events[2], "release 0x54");
    }

    #[test]
    fn test_fail_reply_shape() {
        let action = Action::from_json(r#"{"id":"3","method":"deleteFile"}"#).unwrap();
        let value: serde_json::Value = serde_json::from_str(&action.fail("bad path").to_json()).unwrap();
        assert_eq!(value["data"], "bad path");
        assert_eq!(value["code"], -1);
        assert_eq!(value["method"], "deleteFile");
    }
}
