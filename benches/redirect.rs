//! Redirect resolution benchmarks
//!
//! Location resolution, follow-up request construction and the full
//! per-response decision.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ferry::redirect::{self, RedirectPolicy};
use ferry::RequestSpec;
use http::{header, HeaderValue, Method, Response, StatusCode};
use url::Url;

// =============================================================================
// Location resolution
// =============================================================================

fn bench_resolve_location(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_location");
    let base = Url::parse("http://localhost:8888/app/login?next=home").unwrap();

    let cases = [
        ("absolute", "http://localhost:8889/1"),
        ("absolute_path", "/3"),
        ("relative", "next?x=1"),
        ("scheme_relative", "//cdn.example.com/asset.js"),
        ("dot_segments", "../../other/./page"),
    ];

    for (name, location) in cases {
        group.bench_with_input(BenchmarkId::new("kind", name), &location, |b, location| {
            b.iter(|| redirect::resolve_location(black_box(&base), black_box(location)))
        });
    }

    group.finish();
}

// =============================================================================
// Follow-up requests
// =============================================================================

fn request_with_headers(method: Method, n: usize) -> RequestSpec {
    let url = Url::parse("https://api.example.com/submit").unwrap();
    let mut request = RequestSpec::new(method, url);
    request
        .headers
        .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));
    request
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for i in 0..n {
        request.headers.insert(
            header::HeaderName::from_bytes(format!("x-custom-{}", i).as_bytes()).unwrap(),
            HeaderValue::from_static("value"),
        );
    }
    request.body = Some(bytes::Bytes::from_static(b"{\"user\":\"test\"}"));
    request
}

fn bench_followup_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_followup_request");

    for count in [0, 10, 50] {
        let request = request_with_headers(Method::POST, count);
        group.throughput(Throughput::Elements(count as u64 + 2));

        let same_host = Url::parse("https://api.example.com/result").unwrap();
        group.bench_with_input(BenchmarkId::new("303_same_host", count), &request, |b, req| {
            b.iter(|| {
                redirect::build_followup_request(
                    black_box(req),
                    StatusCode::SEE_OTHER,
                    same_host.clone(),
                )
            })
        });

        let cross_host = Url::parse("https://other.example.com/result").unwrap();
        group.bench_with_input(BenchmarkId::new("307_cross_host", count), &request, |b, req| {
            b.iter(|| {
                redirect::build_followup_request(
                    black_box(req),
                    StatusCode::TEMPORARY_REDIRECT,
                    cross_host.clone(),
                )
            })
        });
    }

    group.finish();
}

// =============================================================================
// Full decision
// =============================================================================

fn bench_resolve_decision(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let request = request_with_headers(Method::GET, 5);

    let redirect_response = Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, "/login")
        .body(())
        .unwrap();
    let ok_response = Response::builder().status(StatusCode::OK).body(()).unwrap();

    let follow = RedirectPolicy::Follow;
    let custom =
        RedirectPolicy::custom(|attempt| attempt.next.host_str() == attempt.previous.host_str());

    group.bench_function("terminal_200", |b| {
        b.iter(|| redirect::resolve(black_box(&request), black_box(&ok_response), 0, &follow, 20))
    });
    group.bench_function("follow_302", |b| {
        b.iter(|| {
            redirect::resolve(black_box(&request), black_box(&redirect_response), 0, &follow, 20)
        })
    });
    group.bench_function("custom_302", |b| {
        b.iter(|| {
            redirect::resolve(black_box(&request), black_box(&redirect_response), 0, &custom, 20)
        })
    });
    group.bench_function("limit_exceeded", |b| {
        b.iter(|| {
            redirect::resolve(black_box(&request), black_box(&redirect_response), 20, &follow, 20)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve_location,
    bench_followup_request,
    bench_resolve_decision,
);

criterion_main!(benches);
