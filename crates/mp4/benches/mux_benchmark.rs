use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use mp4::test_support::make_track_file;
use mp4::{MuxOptions, mux_files, probe};

fn bench_probe(c: &mut Criterion) {
    let data = make_track_file(1, b"vide", 90_000, 3000, 120, 60);
    c.bench_function("probe_120_fragments", |b| {
        b.iter(|| probe(black_box(&data)).expect("probe"))
    });
}

fn bench_mux(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let video = dir.path().join("video.mp4");
    let audio = dir.path().join("audio.mp4");
    std::fs::write(&video, make_track_file(1, b"vide", 90_000, 3000, 120, 60)).expect("write");
    std::fs::write(&audio, make_track_file(1, b"soun", 48_000, 1024, 90, 125)).expect("write");
    let output = dir.path().join("merged.mp4");

    c.bench_function("mux_4min_fixture", |b| {
        b.iter(|| {
            mux_files(
                black_box(&video),
                black_box(&audio),
                &output,
                &MuxOptions::default(),
            )
            .expect("mux")
        })
    });
}

criterion_group!(benches, bench_probe, bench_mux);
criterion_main!(benches);
