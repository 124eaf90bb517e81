//! Synchronous frame access used by the tick step function.
use crate::protocol::transport::can_frame::CanFrame;

/// Non-blocking frame source and sink polled once per tick.
pub trait FramePort {
    /// Next received frame, if any.
    fn receive(&mut self) -> Option<CanFrame>;
    /// Queue a frame for transmission. `Err` hands the frame back when the
    /// driver is busy; the stack retries it on the next tick.
    fn transmit(&mut self, frame: CanFrame) -> Result<(), CanFrame>;
}

/// Destination for frames produced while handling an event.
pub trait FrameSink {
    /// Queue one frame. `Err` hands it back when the queue is full.
    fn push(&mut self, frame: CanFrame) -> Result<(), CanFrame>;
    /// Room left, in frames.
    fn free(&self) -> usize;
}
