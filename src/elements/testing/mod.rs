//! Test and utility source/sink elements.
//!
//! - [`TimerSrc`]: Emits pattern buffers from a timer pump
//! - [`NullSink`]: Counts and discards buffers

mod null;
mod timersrc;

pub use null::{NullSink, NullSinkArgs, NullSinkCommand};
pub use timersrc::{TIMER_SRC_PRODUCED, TestPattern, TimerSrc, TimerSrcArgs};
