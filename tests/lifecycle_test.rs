//! Shutdown behaviour shared by both transports.

use codelens_lib::receiver::{new_server, LifecycleState, OtlpServer, Protocol};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

async fn concurrent_stops_run_hook_once(protocol: Protocol) {
    let (cb, _) = recording_callback();
    let (hook, hooks) = counting_hook();
    let server = new_server(protocol, cb, hook);
    assert_eq!(server.protocol(), protocol);

    let (listener, _) = local_listener().await;
    let serving = Arc::clone(&server);
    let serve = tokio::spawn(async move { serving.serve(listener).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stoppers: Vec<_> = (0..3)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.stop_wait().await })
        })
        .collect();
    for stopper in stoppers {
        tokio::time::timeout(Duration::from_secs(5), stopper)
            .await
            .expect("stop_wait hung")
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("serve loop did not return")
        .unwrap()
        .unwrap();
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_grpc_concurrent_stop_wait() {
    concurrent_stops_run_hook_once(Protocol::Grpc).await;
}

#[tokio::test]
async fn test_http_concurrent_stop_wait() {
    concurrent_stops_run_hook_once(Protocol::Http).await;
}

#[tokio::test]
async fn test_serve_after_stop_returns_immediately() {
    for protocol in [Protocol::Grpc, Protocol::Http] {
        let (cb, _) = recording_callback();
        let (hook, hooks) = counting_hook();
        let server = new_server(protocol, cb, hook);

        server.stop();
        server.stop();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);

        let (listener, _) = local_listener().await;
        tokio::time::timeout(Duration::from_secs(1), server.serve(listener))
            .await
            .expect("serve ran after stop")
            .unwrap();

        // completes without a serve loop ever having run
        tokio::time::timeout(Duration::from_secs(1), server.stop_wait())
            .await
            .expect("stop_wait hung");
    }
}

#[tokio::test]
async fn test_stop_wait_reports_stopped_state() {
    let (cb, _) = recording_callback();
    let (hook, _) = counting_hook();
    let server = Arc::new(codelens_lib::receiver::HttpServer::new(cb, hook));

    let (listener, _) = local_listener().await;
    let serving = Arc::clone(&server);
    let serve = tokio::spawn(async move { serving.serve(listener).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.lifecycle().state(), LifecycleState::Running);

    server.stop_wait().await;
    assert_eq!(server.lifecycle().state(), LifecycleState::Stopped);
    serve.await.unwrap().unwrap();
}
