// Event Module - session event fan-out
//
// The bus delivers single events to subscribers; the batcher coalesces
// per-session updates into one event per interval.

pub mod batcher;
pub mod bus;

pub use batcher::BatchEmitter;
pub use bus::{EventBus, LogLineEvent, SessionEvent, Subscription};
