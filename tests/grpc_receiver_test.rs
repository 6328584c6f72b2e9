//! OTLP/gRPC receiver tests through a tonic client.

use codelens_lib::receiver::{GrpcServer, LifecycleState, OtlpServer};
use opentelemetry_proto::tonic::collector::logs::v1::{
    logs_service_client::LogsServiceClient, ExportLogsServiceRequest,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataValue;

mod common;
use common::*;

async fn start(server: GrpcServer) -> (Arc<GrpcServer>, String, tokio::task::JoinHandle<codelens_lib::Result<()>>) {
    let server = Arc::new(server);
    let (listener, addr) = local_listener().await;
    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.serve(listener).await });
    (server, format!("http://{addr}"), handle)
}

#[tokio::test]
async fn test_export_delivers_spans_with_metadata() {
    let (cb, seen) = recording_callback();
    let (hook, hooks) = counting_hook();
    let (server, url, handle) = start(GrpcServer::new(cb, hook)).await;

    let mut client = TraceServiceClient::connect(url).await.unwrap();
    let mut request = tonic::Request::new(export_request(
        "payments",
        vec![
            TestSpanBuilder::new(4, 1).name("charge").build(),
            TestSpanBuilder::new(4, 2).parent(1).name("stripe call").build(),
        ],
    ));
    request
        .metadata_mut()
        .insert("x-team", MetadataValue::from_static("billing"));
    request
        .metadata_mut()
        .append("x-team", MetadataValue::from_static("ops, oncall"));
    request
        .metadata_mut()
        .insert_bin("trace-bin", MetadataValue::from_bytes(&[0xde, 0xad]));

    client.export(request).await.unwrap();
    drop(client);

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].span_name, "charge");
        assert_eq!(seen[1].span_name, "stripe call");
        assert_eq!(seen[0].service, "payments");
        assert_eq!(seen[0].meta.len(), 1);
        assert_eq!(seen[0].meta["proto"], "grpc");
        assert_eq!(seen[0].headers["x-team"], "billing,\"ops, oncall\"");
        assert_eq!(seen[0].headers["trace-bin"], "dead");
    }

    server.stop_wait().await;
    handle.await.unwrap().unwrap();
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(server.lifecycle().state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_logs_without_callback_are_acknowledged() {
    let (cb, _) = recording_callback();
    let (hook, _) = counting_hook();
    let (server, url, handle) = start(GrpcServer::new(cb, hook)).await;

    let mut client = LogsServiceClient::connect(url).await.unwrap();
    client
        .export(ExportLogsServiceRequest::default())
        .await
        .unwrap();
    drop(client);

    server.stop_wait().await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_request_from_callback() {
    let (cb, seen) = recording_callback();
    let (hook, hooks) = counting_hook();
    let (server, url, handle) = start(GrpcServer::new(cb, hook)).await;

    let mut client = TraceServiceClient::connect(url).await.unwrap();
    client
        .export(export_request(
            "svc",
            vec![
                TestSpanBuilder::new(1, 1).name("stop").build(),
                TestSpanBuilder::new(1, 2).name("skipped").build(),
            ],
        ))
        .await
        .unwrap();
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("serve loop did not return")
        .unwrap()
        .unwrap();
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(hooks.load(Ordering::SeqCst), 1);
    assert_eq!(server.lifecycle().state(), LifecycleState::Stopped);
}
