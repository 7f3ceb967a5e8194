use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipenet::http::assemble::{assemble_headers, AssembleContext};
use pipenet::http::{Headers, ProtocolVersion, Request};

fn browser_like_headers() -> Headers {
    let mut headers = Headers::new();
    headers
        .insert(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        )
        .unwrap();
    headers.insert("Accept-Encoding", "gzip, deflate, br").unwrap();
    headers.insert("Accept-Language", "en-GB,en;q=0.9").unwrap();
    headers.insert("Cache-Control", "max-age=0").unwrap();
    headers
        .insert("Cookie", "session=xxxxxxxxxxxxxxxx; theme=dark; region=eu-west")
        .unwrap();
    headers.insert("Upgrade-Insecure-Requests", "1").unwrap();
    headers
        .insert("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)")
        .unwrap();
    headers
}

fn benchmark_merge_defaults(c: &mut Criterion) {
    let defaults = browser_like_headers();
    let mut specific = Headers::new();
    specific.insert("Accept", "application/json").unwrap();
    specific.insert("X-Request-Id", "42").unwrap();

    c.bench_function("headers_merged", |b| {
        b.iter(|| Headers::merged(black_box(&defaults), black_box(&specific)))
    });
}

fn benchmark_assemble(c: &mut Criterion) {
    let req = Request::get("/search?q=pipelining&page=2");
    let headers = browser_like_headers();
    let fresh = AssembleContext {
        scheme: "http",
        host: "example.com",
        port: 80,
        default_port: 80,
        request_version: ProtocolVersion::HTTP_1_1,
        server_version: None,
        via_http_proxy: false,
    };
    let proxied = AssembleContext {
        port: 8080,
        server_version: Some(ProtocolVersion::HTTP_1_1),
        via_http_proxy: true,
        ..fresh.clone()
    };

    c.bench_function("assemble_fresh_connection", |b| {
        b.iter(|| assemble_headers(&req, black_box(&headers), &fresh))
    });
    c.bench_function("assemble_via_proxy", |b| {
        b.iter(|| assemble_headers(&req, black_box(&headers), &proxied))
    });
}

criterion_group!(benches, benchmark_merge_defaults, benchmark_assemble);
criterion_main!(benches);
