//! Integration tests for the transport layer
//!
//! These tests cover handler bookkeeping shared by all backends, the process
//! backend's readiness buffering (driven over in-memory pipes), and the
//! thread backend's channel lifecycle.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::protocol::WorkrpcError;
    use crate::transport::frame::{self, MAX_FRAME_SIZE};
    use crate::transport::{
        Handlers, ProcessConfig, ProcessTransport, StdioTransport, ThreadConfig, ThreadTransport,
        Transport,
    };

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn Fn(String) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Arc::new(move |m: String| sink.lock().unwrap().push(m)))
    }

    fn channel_handler() -> (
        mpsc::UnboundedReceiver<String>,
        Arc<dyn Fn(String) + Send + Sync>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rx, Arc::new(move |m: String| {
            let _ = tx.send(m);
        }))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    #[test]
    fn test_messages_before_registration_are_replayed_in_order() {
        let handlers = Handlers::new();
        handlers.emit_message("a".into());
        handlers.emit_message("b".into());

        let (seen, handler) = recorder();
        handlers.set_message(handler);
        handlers.emit_message("c".into());

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_last_message_handler_wins() {
        let handlers = Handlers::new();
        let (first, first_handler) = recorder();
        let (second, second_handler) = recorder();

        handlers.set_message(first_handler);
        handlers.set_message(second_handler);
        handlers.emit_message("x".into());

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec!["x"]);
    }

    #[test]
    fn test_handler_registered_during_replay_takes_the_rest() {
        let handlers = Arc::new(Handlers::new());
        for m in ["a", "b", "c"] {
            handlers.emit_message(m.into());
        }

        let (second, second_handler) = recorder();
        let first = Arc::new(Mutex::new(Vec::new()));
        let first_handler = {
            let first = first.clone();
            let handlers = handlers.clone();
            Arc::new(move |m: String| {
                first.lock().unwrap().push(m);
                handlers.set_message(second_handler.clone());
            })
        };

        handlers.set_message(first_handler);
        handlers.emit_message("d".into());

        assert_eq!(*first.lock().unwrap(), vec!["a"]);
        assert_eq!(*second.lock().unwrap(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_error_before_registration_is_replayed() {
        let handlers = Handlers::new();
        handlers.emit_error("pipe closed".into());

        let (seen, handler) = recorder();
        handlers.set_error(handler);

        assert_eq!(*seen.lock().unwrap(), vec!["pipe closed"]);
    }

    #[test]
    fn test_cleared_handlers_ignore_everything() {
        let handlers = Handlers::new();
        let (seen, handler) = recorder();
        handlers.set_message(handler.clone());
        handlers.set_error(handler.clone());

        handlers.clear();
        handlers.emit_message("late".into());
        handlers.emit_error("late".into());
        handlers.set_message(handler);

        assert!(handlers.is_cleared());
        assert!(seen.lock().unwrap().is_empty());
    }

    // ========================================================================
    // Process backend
    // ========================================================================

    #[tokio::test]
    async fn test_sends_before_ready_are_flushed_in_order() {
        let (parent_io, mut child_io) = tokio::io::duplex(64 * 1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let transport = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE).unwrap();

        transport.send("one".into()).unwrap();
        transport.send("two".into()).unwrap();
        transport.send("three".into()).unwrap();
        assert!(!transport.is_ready());

        // Nothing may reach the worker before it signals readiness.
        let early = tokio::time::timeout(
            Duration::from_millis(100),
            frame::read_frame(&mut child_io, MAX_FRAME_SIZE),
        )
        .await;
        assert!(early.is_err(), "frame was written before readiness");

        frame::write_ready(&mut child_io).await.unwrap();
        transport.send("four".into()).unwrap();

        for expected in ["one", "two", "three", "four"] {
            let frame = frame::read_frame(&mut child_io, MAX_FRAME_SIZE)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame, expected.as_bytes());
        }
        assert!(transport.is_ready());
    }

    #[tokio::test]
    async fn test_stdio_pair_exchanges_messages() {
        let (parent_io, child_io) = tokio::io::duplex(64 * 1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let (child_read, child_write) = tokio::io::split(child_io);

        let parent = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE).unwrap();
        parent.send("ping".into()).unwrap();

        let child = StdioTransport::bind_streams(child_read, child_write, MAX_FRAME_SIZE);
        let (mut child_rx, child_handler) = channel_handler();
        child.on_message(child_handler);
        assert_eq!(next(&mut child_rx).await, "ping");

        let (mut parent_rx, parent_handler) = channel_handler();
        parent.on_message(parent_handler);
        child.send("pong".into()).unwrap();
        assert_eq!(next(&mut parent_rx).await, "pong");
    }

    #[tokio::test]
    async fn test_worker_closing_channel_reports_error() {
        let (parent_io, child_io) = tokio::io::duplex(1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let parent = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE).unwrap();

        let (mut errors, handler) = channel_handler();
        parent.on_error(handler);
        drop(child_io);

        let reason = next(&mut errors).await;
        assert!(reason.contains("closed"), "unexpected reason: {}", reason);

        let err = parent.send("after".into()).unwrap_err();
        assert!(matches!(err, WorkrpcError::Transport(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_worker_dying_before_ready_fails_buffered_sends() {
        let (parent_io, child_io) = tokio::io::duplex(1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let parent = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE).unwrap();

        let (mut errors, handler) = channel_handler();
        parent.on_error(handler);
        parent.send("one".into()).unwrap();
        parent.send("two".into()).unwrap();

        drop(child_io);

        assert_eq!(next(&mut errors).await, "worker process closed its channel");
        assert!(!parent.is_ready());
        let err = parent.send("three".into()).unwrap_err();
        assert!(
            matches!(&err, WorkrpcError::Transport(m) if m == "worker process closed its channel"),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_oversized_send_is_refused_without_closing_channel() {
        let (parent_io, mut child_io) = tokio::io::duplex(64 * 1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let parent = ProcessTransport::from_streams(parent_read, parent_write, 16).unwrap();

        // Refused while still buffering, and again once ready.
        let err = parent.send("x".repeat(17)).unwrap_err();
        assert!(matches!(err, WorkrpcError::FrameTooLarge { size: 17, max: 16 }), "got {:?}", err);
        parent.send("small".into()).unwrap();

        frame::write_ready(&mut child_io).await.unwrap();
        assert_eq!(
            frame::read_frame(&mut child_io, 16).await.unwrap().unwrap(),
            b"small"
        );

        assert!(matches!(
            parent.send("y".repeat(64)),
            Err(WorkrpcError::FrameTooLarge { .. })
        ));
        parent.send("after".into()).unwrap();
        assert_eq!(
            frame::read_frame(&mut child_io, 16).await.unwrap().unwrap(),
            b"after"
        );
    }

    #[tokio::test]
    async fn test_stdio_refuses_oversized_send() {
        let (_parent_io, child_io) = tokio::io::duplex(1024);
        let (child_read, child_write) = tokio::io::split(child_io);
        let child = StdioTransport::bind_streams(child_read, child_write, 8);

        assert!(matches!(
            child.send("too long for the limit".into()),
            Err(WorkrpcError::FrameTooLarge { max: 8, .. })
        ));
        child.send("fits".into()).unwrap();
    }

    #[test]
    fn test_process_spawn_outside_runtime_is_a_spawn_error() {
        let result = ProcessTransport::spawn(ProcessConfig::new("workrpc-no-such-binary"));
        assert!(matches!(result, Err(WorkrpcError::Spawn(_))));

        let (parent_io, _child_io) = tokio::io::duplex(1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let result = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE);
        assert!(matches!(result, Err(WorkrpcError::Spawn(m)) if m.contains("tokio runtime")));
    }

    #[tokio::test]
    async fn test_process_terminate_is_idempotent_and_refuses_sends() {
        let (parent_io, _child_io) = tokio::io::duplex(1024);
        let (parent_read, parent_write) = tokio::io::split(parent_io);
        let parent = ProcessTransport::from_streams(parent_read, parent_write, MAX_FRAME_SIZE).unwrap();

        parent.terminate();
        parent.terminate();

        assert!(matches!(parent.send("x".into()), Err(WorkrpcError::Terminated)));
    }

    // ========================================================================
    // Thread backend
    // ========================================================================

    #[tokio::test]
    async fn test_thread_transport_round_trip() {
        let transport = ThreadTransport::spawn(ThreadConfig::default(), |port| async move {
            let port = Arc::new(port);
            let (mut inbox, handler) = channel_handler();
            port.on_message(handler);
            while let Some(message) = inbox.recv().await {
                if port.send(format!("re: {}", message)).is_err() {
                    break;
                }
            }
        })
        .unwrap();

        // Sends are accepted before any handler exists on either side.
        transport.send("hello".into()).unwrap();

        let (mut replies, handler) = channel_handler();
        transport.on_message(handler);
        assert_eq!(next(&mut replies).await, "re: hello");
    }

    #[tokio::test]
    async fn test_thread_exit_reports_error() {
        let transport = ThreadTransport::spawn(ThreadConfig::default().name("short-lived"), |port| async move {
            drop(port);
        })
        .unwrap();

        let (mut errors, handler) = channel_handler();
        transport.on_error(handler);

        assert_eq!(next(&mut errors).await, "worker thread exited");
    }

    #[test]
    fn test_thread_spawn_outside_runtime_is_a_spawn_error() {
        let result = ThreadTransport::spawn(ThreadConfig::default(), |port| async move {
            drop(port);
        });
        assert!(matches!(result, Err(WorkrpcError::Spawn(m)) if m.contains("tokio runtime")));
    }

    #[tokio::test]
    async fn test_thread_terminate_stops_worker() {
        let transport = ThreadTransport::spawn(ThreadConfig::default(), |port| async move {
            let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
            port.on_error(Arc::new(move |reason: String| {
                let _ = closed_tx.send(reason);
            }));
            closed_rx.recv().await;
        })
        .unwrap();

        transport.terminate();
        assert!(matches!(transport.send("x".into()), Err(WorkrpcError::Terminated)));

        for _ in 0..100 {
            if transport.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker thread still running after terminate");
    }
}
