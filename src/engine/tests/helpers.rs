use crate::engine::Engine;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing controlled by `RUST_LOG`. Safe to call repeatedly —
/// only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open an engine at `path` with tracing initialized.
pub fn open(path: &Path) -> Engine {
    init_tracing();
    Engine::open(path).expect("open")
}

/// The repeated-character value used by the end-to-end scenarios:
/// `"s" * (key + 1)`.
pub fn svalue(key: u64) -> Vec<u8> {
    vec![b's'; key as usize + 1]
}

/// Write keys `0..count` with [`svalue`] payloads. Large counts cross the
/// rotation threshold and exercise the flush path.
pub fn fill(engine: &mut Engine, count: u64) {
    for key in 0..count {
        engine.put(key, svalue(key)).expect("put");
    }
}
