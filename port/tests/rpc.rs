//! Integration tests for the RPC substrate.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use stylesync_port::{
    channel_pair, serve_port, text_channel_pair, ClientOptions, CommandSet, Frame, Handler, Hub,
    PortClient, PortError, Request, Response, Target, WorkerOptions, WorkerState, IDLE_TIMEOUT,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stylesync_port=debug".into()),
        )
        .try_init();
}

fn echo_commands() -> CommandSet {
    CommandSet::new()
        .register("echo", |args| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
        .register("hang", |_args| async move {
            std::future::pending::<()>().await;
            unreachable!()
        })
}

#[tokio::test]
async fn concurrent_calls_resolve_out_of_order() {
    init_tracing();
    let hub = Hub::new();
    let (near, far) = channel_pair();

    // Manual remote: buffer three requests, answer them in reverse order.
    tokio::spawn(async move {
        let mut far = far;
        let mut requests = Vec::new();
        while requests.len() < 3 {
            match far.recv().await.unwrap().unwrap() {
                Frame::Request(req) => requests.push(req),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        for req in requests.into_iter().rev() {
            let payload = req.args.into_iter().nth(1).unwrap();
            far.post(Frame::Response(Response::ok(req.id, payload)))
                .unwrap();
        }
    });

    let client = PortClient::direct(hub, near, ClientOptions::default());
    let (a, b, c) = tokio::join!(
        client.call("echo", vec![json!("alpha")]),
        client.call("echo", vec![json!("beta")]),
        client.call("echo", vec![json!("gamma")]),
    );
    // Reverse-order responses still land on their own callers.
    assert_eq!(a.unwrap(), json!("alpha"));
    assert_eq!(b.unwrap(), json!("beta"));
    assert_eq!(c.unwrap(), json!("gamma"));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn liveness_loss_rejects_every_pending_call() {
    init_tracing();
    let hub = Hub::new();
    let worker = hub.spawn_worker(
        "background",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: false,
            ..Default::default()
        },
    );
    let client = Arc::new(PortClient::to_worker(hub, "background"));

    // A first response arms the lease watcher.
    client.call("echo", vec![json!(1)]).await.unwrap();

    let mut hanging = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        hanging.push(tokio::spawn(async move {
            client.call("hang", vec![]).await
        }));
    }
    // Let the hanging calls reach the worker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count().await, 3);

    worker.kill();

    for handle in hanging {
        let result = handle.await.unwrap();
        match result {
            Err(PortError::Disconnected { origin }) => {
                assert!(origin.to_string().contains("rpc.rs"));
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
    // Give the watcher a beat to discard the dead channel.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.pending_count().await, 0);
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn idle_worker_terminates_after_quiet_period() {
    init_tracing();
    let hub = Hub::new();
    let worker = hub.spawn_worker(
        "offscreen",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: true,
            idle_timeout: Duration::from_millis(150),
        },
    );
    let client = PortClient::to_worker(hub, "offscreen");

    client.call("echo", vec![json!("x")]).await.unwrap();
    assert!(!worker.is_finished());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(worker.is_finished(), "quiet worker must self-terminate");
}

#[tokio::test]
async fn call_mid_countdown_cancels_termination() {
    init_tracing();
    let hub = Hub::new();
    let worker = hub.spawn_worker(
        "offscreen",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: true,
            idle_timeout: Duration::from_millis(150),
        },
    );
    let client = PortClient::to_worker(hub, "offscreen");

    client.call("echo", vec![json!(1)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // This call lands mid-countdown and must reset it.
    client.call("echo", vec![json!(2)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(90)).await;
    assert!(
        !worker.is_finished(),
        "countdown must restart on new inbound work"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(worker.is_finished());
}

#[tokio::test]
async fn keep_alive_pin_blocks_idle_shutdown() {
    init_tracing();
    let hub = Hub::new();
    let worker = hub.spawn_worker(
        "offscreen",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: true,
            idle_timeout: Duration::from_millis(100),
        },
    );
    let client = PortClient::to_worker(hub, "offscreen");

    let pin = worker.keep_alive();
    client.call("echo", vec![json!("x")]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!worker.is_finished(), "pinned worker must stay alive");

    drop(pin);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(worker.is_finished());
}

#[tokio::test]
async fn once_channel_is_torn_down_after_first_response() {
    init_tracing();
    let hub = Hub::new();
    let _worker = hub.spawn_worker(
        "helper",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: false,
            ..Default::default()
        },
    );
    let client = PortClient::new(
        hub,
        Box::new(|| async { Ok(Target::Worker("helper".into())) }.boxed()),
        ClientOptions {
            once: true,
            ..Default::default()
        },
    );

    assert_eq!(client.call("echo", vec![json!(1)]).await.unwrap(), json!(1));
    // One-shot: the channel is discarded right after the response.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!client.is_connected().await);

    // The next call transparently opens a fresh channel.
    assert_eq!(client.call("echo", vec![json!(2)]).await.unwrap(), json!(2));
}

#[tokio::test]
async fn text_only_transport_falls_back_transparently() {
    init_tracing();
    let hub = Hub::new();
    let (near, far) = text_channel_pair();
    let state = WorkerState::new(false, IDLE_TIMEOUT);
    tokio::spawn(serve_port(
        far,
        Handler::commands(echo_commands()),
        state,
        false,
    ));

    let client = PortClient::direct(hub, near, ClientOptions::default());
    let result = client.call("echo", vec![json!({"nested": [1, 2]})]).await;
    assert_eq!(result.unwrap(), json!({"nested": [1, 2]}));
}

#[tokio::test]
async fn sequence_numbers_step_back_when_idle() {
    init_tracing();
    let hub = Hub::new();
    let (near, far) = channel_pair();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        tokio::spawn(async move {
            let mut far = far;
            while let Some(frame) = far.recv().await {
                if let Frame::Request(Request { id, args }) = frame.unwrap() {
                    seen.lock().unwrap().push(id);
                    far.post(Frame::Response(Response::ok(id, args[1].clone())))
                        .unwrap();
                }
            }
        });
    }

    let client = PortClient::direct(hub, near, ClientOptions::default());
    client.call("echo", vec![json!("a")]).await.unwrap();
    client.call("echo", vec![json!("b")]).await.unwrap();

    // With no calls outstanding the counter steps back, so both
    // requests carry the same id.
    assert_eq!(seen.lock().unwrap().as_slice(), &[1, 1]);
}

#[tokio::test]
async fn remote_errors_carry_the_local_call_origin() {
    init_tracing();
    let hub = Hub::new();
    let _worker = hub.spawn_worker(
        "background",
        Handler::commands(echo_commands()),
        WorkerOptions {
            auto_close: false,
            ..Default::default()
        },
    );
    let client = PortClient::to_worker(hub, "background");

    let result = client.call("frobnicate", vec![]).await;
    match result {
        Err(PortError::Remote {
            message,
            kind,
            origin,
        }) => {
            assert!(message.contains("frobnicate"));
            assert_eq!(kind.as_deref(), Some("unknownCommand"));
            assert!(origin.to_string().contains("rpc.rs"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn indirect_context_target_handshakes_a_fresh_channel() {
    init_tracing();
    let hub = Hub::new();
    let (handle, mut inbox) = stylesync_port::context_channel();

    // A bare context serving whatever ports are handed to it.
    tokio::spawn(async move {
        let state = WorkerState::new(false, IDLE_TIMEOUT);
        while let Some(handshake) = inbox.recv().await {
            tokio::spawn(serve_port(
                handshake.port,
                Handler::commands(echo_commands()),
                state.clone(),
                handshake.once,
            ));
        }
    });

    let client = PortClient::new(
        hub,
        Box::new(move || {
            let handle = handle.clone();
            async move { Ok(Target::Context(handle)) }.boxed()
        }),
        ClientOptions::default(),
    );
    let result = client.call("echo", vec![json!("via handshake")]).await;
    assert_eq!(result.unwrap(), json!("via handshake"));
}
