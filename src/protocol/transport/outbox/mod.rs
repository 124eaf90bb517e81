//! Bounded queue of frames waiting for the bus. Every producer in the stack
//! (claim, transport, router, timers) pushes here; `tick` drains it into the
//! [`FramePort`] and the async runner drains it into the [`CanBus`].
//!
//! [`CanBus`]: super::traits::can_bus::CanBus
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::error::SendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::frame_port::{FramePort, FrameSink};

/// Default outbound capacity, in frames. Fits one full fast-packet message.
pub const OUTBOX_FRAMES: usize = 32;

pub struct Outbox<M: RawMutex, const N: usize = OUTBOX_FRAMES> {
    queue: Channel<M, CanFrame, N>,
    /// Frame refused by the driver, retried first on the next drain.
    held: Option<CanFrame>,
}

impl<M: RawMutex, const N: usize> Default for Outbox<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> Outbox<M, N> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            held: None,
        }
    }

    /// Frames waiting, the held one included.
    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.held.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue every frame of one message or none of them.
    pub fn push_all<I>(&mut self, frames: I) -> Result<(), SendError>
    where
        I: IntoIterator<Item = CanFrame>,
        I::IntoIter: ExactSizeIterator,
    {
        let frames = frames.into_iter();
        if frames.len() > self.free() {
            return Err(SendError::QueueFull);
        }
        for frame in frames {
            self.push(frame).map_err(|_| SendError::QueueFull)?;
        }
        Ok(())
    }

    /// Next frame to put on the bus.
    pub fn pop(&mut self) -> Option<CanFrame> {
        self.held.take().or_else(|| self.queue.try_receive().ok())
    }

    /// Hand up to `max` frames to `port`. A refused frame is kept and retried
    /// first next time. Returns the number of frames accepted by the port.
    pub fn drain_into(&mut self, port: &mut impl FramePort, max: usize) -> usize {
        let mut sent = 0;
        while sent < max {
            let Some(frame) = self.pop() else {
                break;
            };
            if let Err(frame) = port.transmit(frame) {
                #[cfg(feature = "defmt")]
                defmt::trace!("outbox: driver busy, holding frame");
                self.held = Some(frame);
                break;
            }
            sent += 1;
        }
        sent
    }

    /// Discard every pending frame.
    pub fn clear(&mut self) {
        self.held = None;
        while self.queue.try_receive().is_ok() {}
    }
}

impl<M: RawMutex, const N: usize> FrameSink for Outbox<M, N> {
    fn push(&mut self, frame: CanFrame) -> Result<(), CanFrame> {
        self.queue.try_send(frame).map_err(|TrySendError::Full(frame)| frame)
    }

    fn free(&self) -> usize {
        self.queue.free_capacity()
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
