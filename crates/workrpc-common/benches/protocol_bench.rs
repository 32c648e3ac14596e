// Criterion benchmarks for workrpc-common envelope encoding
//
// Run benchmarks with:
//   cargo bench -p workrpc-common
//
// For detailed output with plots:
//   cargo bench -p workrpc-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use workrpc_common::transport::JsonCodec;
use workrpc_common::{Request, Response};

fn bench_request_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encoding");

    group.bench_function("encode_small", |b| {
        let req = Request::new(1, "echo", json!({"msg": "hi"}));
        b.iter(|| JsonCodec::encode_request(black_box(&req)));
    });

    group.bench_function("encode_large", |b| {
        let witness: Vec<String> = (0..1000).map(|i| format!("0x{:064x}", i)).collect();
        let req = Request::new(1, "prove", json!({ "witness": witness }));
        b.iter(|| JsonCodec::encode_request(black_box(&req)));
    });

    group.finish();
}

fn bench_request_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_decoding");

    let small = r#"{"id":1,"methodName":"echo","data":{"msg":"hi"}}"#;
    group.bench_function("decode_small", |b| {
        b.iter(|| JsonCodec::decode_request(black_box(small)));
    });

    group.bench_function("decode_invalid", |b| {
        b.iter(|| JsonCodec::decode_request(black_box("{not json")));
    });

    group.finish();
}

fn bench_response_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_codec");

    group.bench_function("encode_success", |b| {
        let resp = Response::success(1, json!({"echoed": "Echo: hi"}));
        b.iter(|| JsonCodec::encode_response(black_box(&resp)));
    });

    group.bench_function("encode_error", |b| {
        let resp = Response::error(1, "constraint not satisfied");
        b.iter(|| JsonCodec::encode_response(black_box(&resp)));
    });

    let success = r#"{"id":1,"data":{"echoed":"Echo: hi"}}"#;
    group.bench_function("decode_success", |b| {
        b.iter(|| JsonCodec::decode_response(black_box(success)));
    });

    let error = r#"{"id":1,"error":"boom"}"#;
    group.bench_function("decode_error", |b| {
        b.iter(|| JsonCodec::decode_response(black_box(error)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encoding,
    bench_request_decoding,
    bench_response_codec
);
criterion_main!(benches);
