use bencher::{benchmark_group, benchmark_main, Bencher};
use watchkit::prelude::*;

fn set_without_listeners(b: &mut Bencher) {
  let w = Watcher::new(0u64);
  let mut i = 0u64;
  b.iter(|| {
    i += 1;
    w.set(i)
  });
}

fn notify_one_listener(b: &mut Bencher) {
  let w = Watcher::new(0u64);
  let _h = w.on_change(|v| {
    bencher::black_box(*v);
  });
  let mut i = 0u64;
  b.iter(|| {
    i += 1;
    w.set(i)
  });
}

fn notify_eight_listeners(b: &mut Bencher) {
  let w = Watcher::new(0u64);
  let _handles: Vec<_> = (0..8)
    .map(|_| {
      w.on_change(|v| {
        bencher::black_box(*v);
      })
    })
    .collect();
  let mut i = 0u64;
  b.iter(|| {
    i += 1;
    w.set(i)
  });
}

fn skipped_equal_set(b: &mut Bencher) {
  let w = Watcher::new(0u64);
  let _h = w.on_change(|v| {
    bencher::black_box(*v);
  });
  b.iter(|| w.set(0));
}

benchmark_group!(
  notify,
  set_without_listeners,
  notify_one_listener,
  notify_eight_listeners,
  skipped_equal_set
);
benchmark_main!(notify);
