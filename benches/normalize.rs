//! Benchmarks for route normalization and track parsing.
//!
//! Run with: `cargo bench`

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geo::Coord;
use trackcorpus::{FixedTimezone, TrackParser, normalize_route};

/// A deterministic noisy route of `n` points, roughly 10 m apart.
fn synthetic_route(n: usize) -> Vec<Coord> {
    (0..n)
        .map(|i| {
            let f = i as f64;
            Coord {
                x: 8.54 + f * 0.00009 + (f * 0.05).sin() * 0.0004 + (f * 1.7).sin() * 0.00002,
                y: 47.37 + f * 0.00006 + (f * 0.03).cos() * 0.0003 + (f * 2.3).cos() * 0.00002,
            }
        })
        .collect()
}

fn synthetic_gpx(n: usize) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\" creator=\"bench\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\"><trk><trkseg>\n",
    );
    for (i, c) in synthetic_route(n).iter().enumerate() {
        doc.push_str(&format!(
            "<trkpt lat=\"{:.7}\" lon=\"{:.7}\"><ele>{:.1}</ele><time>2023-05-01T{:02}:{:02}:{:02}Z</time></trkpt>\n",
            c.y,
            c.x,
            400.0 + (i as f64 * 0.01).sin() * 20.0,
            6 + i / 3600,
            (i / 60) % 60,
            i % 60
        ));
    }
    doc.push_str("</trkseg></trk></gpx>\n");
    doc
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_route");
    for n in [100, 1_000, 10_000] {
        let route = synthetic_route(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &route, |b, route| {
            b.iter(|| normalize_route(black_box(route)))
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let parser = TrackParser::new(Arc::new(FixedTimezone::utc()));
    let gpx = synthetic_gpx(3_600);
    c.bench_function("parse_reader_1h_ride", |b| {
        b.iter(|| parser.parse_reader("bench.gpx", black_box(gpx.as_bytes()), false))
    });
}

criterion_group!(benches, bench_normalize, bench_parse);
criterion_main!(benches);
