use std::sync::Arc;

use lfs_types::Direction;

/// Byte progress for one object: `(direction, name, read, total, chunk)`.
pub type ProgressCallback = Arc<dyn Fn(Direction, &str, u64, u64, usize) + Send + Sync>;

/// Receiver of queue progress events. Calls are synchronous and must
/// return quickly. Every method defaults to doing nothing.
pub trait ProgressMeter: Send + Sync {
    /// The queue started processing.
    fn start(&self) {}

    /// An object of `size` bytes was accepted.
    fn add(&self, _size: u64) {}

    /// An object needed no transfer.
    fn skip(&self, _size: u64) {}

    fn start_transfer(&self, _name: &str) {}

    fn transfer_bytes(&self, _direction: Direction, _name: &str, _read: u64, _total: u64, _chunk: usize) {}

    /// Called once per name an object was added under.
    fn finish_transfer(&self, _name: &str) {}

    /// The queue is closed.
    fn finish(&self) {}
}

/// A meter that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMeter;

impl ProgressMeter for NoopMeter {}

/// Adapter callback that forwards to `meter`.
pub fn meter_callback(meter: Arc<dyn ProgressMeter>) -> ProgressCallback {
    Arc::new(move |direction, name, read, total, chunk| {
        meter.transfer_bytes(direction, name, read, total, chunk)
    })
}
