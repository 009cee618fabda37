// A host lifecycle: listener registration, TUN session, events, teardown
use host_bridge::{
    CallbackHandle, EventListener, HostCallbacks, Message, MessageType, SocketProtector,
    TunnelContext,
};
use std::sync::{Arc, Mutex};

fn recording_host() -> (HostCallbacks, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let releases = Arc::clone(&calls);
    let protects = Arc::clone(&calls);
    let results = Arc::clone(&calls);

    let callbacks = HostCallbacks::new()
        .with_release_object(move |obj| {
            releases.lock().unwrap().push(format!("release {:#x}", obj.addr()))
        })
        .with_protect_socket(move |ctx, fd| {
            protects.lock().unwrap().push(format!("protect {:#x} {}", ctx.addr(), fd))
        })
        .with_invoke_result(move |cb, data| {
            let value: serde_json::Value = serde_json::from_str(data).unwrap();
            results
                .lock()
                .unwrap()
                .push(format!("result {:#x} {}", cb.addr(), value["data"]["type"]))
        });

    (callbacks, calls)
}

#[test]
fn full_session_releases_every_host_handle_once() {
    let (callbacks, calls) = recording_host();
    let listener = EventListener::new(callbacks.clone());
    let protector = SocketProtector::new(callbacks.clone());

    listener.set(Some(CallbackHandle::from_addr(0x100)));
    protector
        .start(TunnelContext::from_addr(0x200), 10, "system", "172.19.0.1/30", "172.19.0.2")
        .unwrap();

    assert!(protector.protect_fd(31));
    assert!(listener.emit(&Message::new(
        MessageType::Connections,
        serde_json::json!([])
    )));

    // Restarting replaces the tunnel context
    protector
        .start(TunnelContext::from_addr(0x300), 11, "mixed", "172.19.0.1/30", "")
        .unwrap();
    assert!(protector.protect_fd(32));

    protector.stop();
    listener.set(None);
    assert!(!protector.protect_fd(33));
    assert!(!listener.emit(&Message::log(log::Level::Warn, "late")));

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "protect 0x200 31".to_string(),
            "result 0x100 \"connections\"".to_string(),
            "release 0x200".to_string(),
            "protect 0x300 32".to_string(),
            "release 0x300".to_string(),
            "release 0x100".to_string(),
        ]
    );
}
