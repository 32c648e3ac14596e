// Integration tests for workrpc-worker
//
// These tests run a real worker on the thread backend and drive it through a
// ParentProxy, plus a loopback transport that feeds a Dispatcher's responses
// straight back into the proxy that issued the requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use workrpc_client::ParentProxy;
use workrpc_common::protocol::error::{Result, WorkrpcError};
use workrpc_common::transport::{
    ErrorHandler, MessageHandler, ThreadConfig, ThreadTransport, Transport,
};
use workrpc_worker::{spawn_thread_worker, Dispatcher, MethodRegistry};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Deserialize)]
struct Msg {
    msg: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Echoed {
    echoed: String,
}

fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry
        .register("echo", |args: Msg| async move {
            Ok::<_, String>(Echoed {
                echoed: format!("Echo: {}", args.msg),
            })
        })
        .register("shout", |args: Msg| async move {
            if args.msg.is_empty() {
                return Err("boom".to_string());
            }
            Ok(json!({ "shouted": args.msg.to_uppercase() }))
        })
        .register("sleep", |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(ms)
        });
    registry
}

fn thread_proxy() -> ParentProxy<ThreadTransport> {
    let transport = spawn_thread_worker(ThreadConfig::default().name("test-worker"), registry())
        .expect("failed to spawn worker thread");
    ParentProxy::new(transport)
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Parent-side transport whose "worker" is a Dispatcher on the same runtime.
struct Loopback {
    dispatcher: Dispatcher,
    on_message: Arc<Mutex<Option<MessageHandler>>>,
}

impl Transport for Loopback {
    fn send(&self, message: String) -> Result<()> {
        let dispatcher = self.dispatcher.clone();
        let on_message = self.on_message.clone();
        tokio::spawn(async move {
            if let Some(response) = dispatcher.dispatch(&message).await {
                let handler = on_message.lock().unwrap().clone();
                if let Some(handler) = handler {
                    handler(response);
                }
            }
        });
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.on_message.lock().unwrap() = Some(handler);
    }

    fn on_error(&self, _handler: ErrorHandler) {}

    fn terminate(&self) {
        self.on_message.lock().unwrap().take();
    }
}

// ============================================================================
// Thread backend
// ============================================================================

#[tokio::test]
async fn test_echo_over_thread_backend() {
    let proxy = thread_proxy();

    let reply: Echoed = within(proxy.call("echo", &json!({"msg": "hi"})))
        .await
        .unwrap();

    assert_eq!(
        reply,
        Echoed {
            echoed: "Echo: hi".into()
        }
    );
}

#[tokio::test]
async fn test_remote_failure_over_thread_backend() {
    let proxy = thread_proxy();

    let err = within(proxy.call::<_, Value>("shout", &json!({"msg": ""})))
        .await
        .unwrap_err();

    assert!(matches!(&err, WorkrpcError::Remote(m) if m == "boom"), "got {:?}", err);

    // A failed call leaves the channel usable.
    let ok: Value = within(proxy.call("shout", &json!({"msg": "hey"})))
        .await
        .unwrap();
    assert_eq!(ok, json!({"shouted": "HEY"}));
}

#[tokio::test]
async fn test_unknown_method_over_thread_backend() {
    let proxy = thread_proxy();

    let err = within(proxy.call_value("missing", Value::Null))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "unknown method: missing");
}

#[tokio::test]
async fn test_responses_complete_out_of_order() {
    let proxy = thread_proxy();

    let slow = proxy.call::<_, u64>("sleep", &300u64);
    let fast = proxy.call::<_, u64>("sleep", &1u64);

    assert_eq!(within(fast).await.unwrap(), 1);
    // The slow call is still outstanding when the fast one settles.
    assert_eq!(proxy.pending_count(), 1);
    assert_eq!(within(slow).await.unwrap(), 300);
}

#[tokio::test]
async fn test_many_concurrent_calls_resolve_by_id() {
    let proxy = thread_proxy();

    let calls: Vec<_> = (0..50)
        .map(|i| proxy.call::<_, Echoed>("echo", &json!({ "msg": i.to_string() })))
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let reply = within(call).await.unwrap();
        assert_eq!(reply.echoed, format!("Echo: {}", i));
    }
    assert_eq!(proxy.pending_count(), 0);
}

#[tokio::test]
async fn test_terminate_rejects_outstanding_calls() {
    let proxy = thread_proxy();

    let a = proxy.call::<_, u64>("sleep", &60_000u64);
    let b = proxy.call::<_, u64>("sleep", &60_000u64);

    proxy.terminate();

    assert!(matches!(within(a).await, Err(WorkrpcError::Terminated)));
    assert!(matches!(within(b).await, Err(WorkrpcError::Terminated)));
    assert!(matches!(
        proxy.call::<_, Value>("echo", &json!({"msg": "late"})).await,
        Err(WorkrpcError::Terminated)
    ));

    for _ in 0..100 {
        if proxy.transport().is_finished() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("worker thread kept running after terminate");
}

#[tokio::test]
async fn test_worker_exit_rejects_pending_calls() {
    // A worker that serves nothing and exits straight away.
    let transport = ThreadTransport::spawn(ThreadConfig::default(), |port| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(port);
    })
    .unwrap();
    let proxy = ParentProxy::new(transport);

    let err = within(proxy.call_value("hang", Value::Null)).await.unwrap_err();
    assert!(
        matches!(&err, WorkrpcError::Transport(m) if m == "worker thread exited"),
        "got {:?}",
        err
    );
    assert!(!proxy.is_terminated());
}

// ============================================================================
// Dispatcher round trip
// ============================================================================

#[tokio::test]
async fn test_dispatcher_response_resolves_originating_call() {
    let proxy = ParentProxy::new(Loopback {
        dispatcher: Dispatcher::new(registry()),
        on_message: Arc::new(Mutex::new(None)),
    });

    let reply: Echoed = within(proxy.call("echo", &json!({"msg": "loop"})))
        .await
        .unwrap();
    assert_eq!(reply.echoed, "Echo: loop");

    let err = within(proxy.call::<_, Value>("echo", &json!({"wrong": 1})))
        .await
        .unwrap_err();
    assert!(
        err.to_string().starts_with("invalid arguments for echo: "),
        "got {}",
        err
    );
}
