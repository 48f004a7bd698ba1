use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Builder;

use webchain::{Chain, Handle, HttpRequestMethod, Request};

fn build_layers(depth: usize) -> Chain {
    let mut chain = Chain::new();
    for _ in 0..depth {
        chain.link(|next| next).unwrap();
    }
    chain.content("ok", "text/plain").unwrap();
    chain
}

fn assemble_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_assemble");

    for depth in [1, 10, 100].iter() {
        let chain = build_layers(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &chain, |b, chain| {
            b.iter(|| black_box(chain.finish()));
        });
    }

    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let runtime = Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("chain_dispatch");

    let mut routed = Chain::new();
    routed
        .time()
        .unwrap()
        .parse_query()
        .unwrap()
        .route("/api", |api| {
            api.methods(|branches| {
                branches.branch(&["GET"]).content("get", "text/plain")?;
                branches.branch(&["POST"]).content("post", "text/plain")?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap()
        .not_found()
        .unwrap();

    let cases = [
        ("plain", build_layers(10).finish(), "/"),
        ("routed_hit", routed.finish(), "/api/items?page=2"),
        ("routed_miss", routed.finish(), "/other"),
    ];

    for (name, handler, path) in cases.iter() {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let request = Request::new(HttpRequestMethod::Get, path);
                runtime.block_on(handler.handle(black_box(request))).unwrap()
            });
        });
    }

    group.finish();
}

fn negotiation_benchmark(c: &mut Criterion) {
    let runtime = Builder::new_current_thread().build().unwrap();

    let mut chain = Chain::new();
    chain
        .content_types(|branches| {
            branches.branch(&["application/json"]).content("{}", "application/json")?;
            branches.branch(&["text/html"]).content("<p></p>", "text/html")?;
            branches.branch(&["text/plain"]).content("", "text/plain")?;
            Ok(())
        })
        .unwrap();
    let handler = chain.finish();

    c.bench_function("content_type_negotiation", |b| {
        b.iter(|| {
            let request = Request::new(HttpRequestMethod::Get, "/")
                .with_header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8");
            runtime.block_on(handler.handle(black_box(request))).unwrap()
        });
    });
}

criterion_group!(
    benches,
    assemble_benchmark,
    dispatch_benchmark,
    negotiation_benchmark
);
criterion_main!(benches);
