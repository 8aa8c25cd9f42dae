use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use multicam::conversion::{correct, infer_layout, pack, to_rgb, Orientation};
use multicam::platform::{Facing, SyntheticCamera, SyntheticChroma, TestPattern};

fn sensor(width: u32, height: u32, chroma: SyntheticChroma) -> SyntheticCamera {
    SyntheticCamera::new("0", Facing::Back, width, height)
        .with_pattern(TestPattern::Gradient)
        .with_chroma(chroma)
}

fn benchmark_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");

    for (name, chroma) in [
        ("nv21", SyntheticChroma::SemiPlanar),
        ("yv12", SyntheticChroma::Planar),
    ] {
        let image = sensor(1440, 1080, chroma).render(0, 0, None);
        let layout = infer_layout(&image).unwrap();
        group.bench_with_input(BenchmarkId::new("1440x1080", name), &image, |b, image| {
            b.iter(|| pack(black_box(image), layout).unwrap());
        });
    }

    group.finish();
}

fn benchmark_to_rgb(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_rgb");

    for (width, height) in [(640, 480), (1440, 1080)] {
        let image = sensor(width, height, SyntheticChroma::SemiPlanar).render(0, 0, None);
        let packed = pack(&image, infer_layout(&image).unwrap()).unwrap();
        group.bench_with_input(
            BenchmarkId::new("frame", format!("{width}x{height}")),
            &packed,
            |b, packed| b.iter(|| to_rgb(black_box(packed))),
        );
    }

    group.finish();
}

fn benchmark_correct(c: &mut Criterion) {
    let mut group = c.benchmark_group("correct");
    let image = sensor(1440, 1080, SyntheticChroma::SemiPlanar).render(0, 0, None);
    let frame = to_rgb(&pack(&image, infer_layout(&image).unwrap()).unwrap());

    for degrees in [0, 90, 180, 270] {
        let orientation = Orientation::from_degrees(degrees).unwrap();
        group.bench_with_input(BenchmarkId::new("degrees", degrees), &frame, |b, frame| {
            b.iter(|| correct(black_box(frame.clone()), orientation));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_pack, benchmark_to_rgb, benchmark_correct);
criterion_main!(benches);
