use criterion::{criterion_group, criterion_main, Criterion};
use sketchwire_core::{
    Canvas, Color, CommittedOperation, EditOperation, InputEvent, OperationKind, Point, Raster,
};
use std::hint::black_box;

fn bench_pen_stroke_commit(c: &mut Criterion) {
    c.bench_function("pen_stroke_1000pts_commit", |b| {
        let canvas = Canvas::new();
        canvas
            .set_active_operation(EditOperation::new(OperationKind::Pen))
            .unwrap();
        b.iter(|| {
            canvas.handle_input(InputEvent::Press(Point::new(0, 0))).unwrap();
            for i in 1..1000 {
                canvas
                    .handle_input(InputEvent::Drag(Point::new(i % 512, i / 2)))
                    .unwrap();
            }
            canvas
                .handle_input(InputEvent::Release(Point::new(511, 511)))
                .unwrap();
        })
    });
}

fn bench_remote_commit(c: &mut Criterion) {
    let op = CommittedOperation::line(Point::new(0, 0), Point::new(100, 100), Color::BLACK);
    c.bench_function("remote_commit", |b| {
        let canvas = Canvas::new();
        b.iter(|| black_box(canvas.commit_remote_operation(op.clone())))
    });
}

fn bench_render_history(c: &mut Criterion) {
    let canvas = Canvas::new();
    for i in 0..500 {
        canvas.commit_remote_operation(CommittedOperation::line(
            Point::new(0, i),
            Point::new(511, 511 - i),
            Color::BLACK,
        ));
    }
    c.bench_function("render_500_lines_512x512", |b| {
        let mut surface = Raster::new(512, 512);
        b.iter(|| {
            surface.clear();
            canvas.render(black_box(&mut surface));
        })
    });
}

criterion_group!(
    benches,
    bench_pen_stroke_commit,
    bench_remote_commit,
    bench_render_history,
);
criterion_main!(benches);
