use stackprof::{
  BlockProfileRecord, MemProfileRecord, Profiler, SafepointWorld,
  StackSignature, SymbolizingFormatter,
};
use tracing_subscriber::EnvFilter;

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let profiler = Profiler::new();
  profiler.register_worker_here();

  let site_a = StackSignature::new(&[0x1000, 0x2000]);
  let site_b = StackSignature::new(&[0x3000]);

  profiler.record_allocation(&site_a, 128);
  profiler.record_allocation(&site_b, 64);
  profiler.record_free(&site_b, 64);
  profiler.record_blocking_event(&site_a, 100);
  profiler.record_blocking_event(&site_a, 50);
  profiler.record_allocation_here(32);

  let mut records = [MemProfileRecord::default(); 8];
  let (n, complete) = profiler.mem_profile(&mut records, false);

  println!("=== memory profile ({n} records, complete={complete}) ===");
  for record in records.iter().take(n) {
    println!(
      "in_use={}B allocs={} frees={} stack={:x?}",
      record.in_use_bytes(),
      record.alloc_objects,
      record.free_objects,
      record.stack()
    );
  }

  let mut blocking = [BlockProfileRecord::default(); 8];
  let (n, _) = profiler.block_profile(&mut blocking);

  println!("=== block profile ({n} records) ===");
  for record in blocking.iter().take(n) {
    println!(
      "count={} cycles={} stack={:x?}",
      record.count,
      record.cycles,
      record.stack()
    );
  }

  let world = SafepointWorld::new();
  let _task = world.register_current();

  let mut buf = [0u8; 4096];
  let written =
    profiler.capture_stack(&world, &SymbolizingFormatter, &mut buf, true);

  println!("=== stack dump ===");
  println!("{}", String::from_utf8_lossy(&buf[..written]));

  if let Err(err) = profiler.mem_snapshot(true).export_json(std::io::stdout())
  {
    eprintln!("json export failed: {err}");
  }
  println!();
}
