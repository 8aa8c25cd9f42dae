//! Downstream frame delivery.

use crate::buffering::FrameMetadata;
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

/// Errors reported by a publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The receiving end was dropped.
    #[error("downstream receiver is gone")]
    Disconnected,
    /// Any other failure, with a message.
    #[error("publish failed: {0}")]
    Other(String),
}

/// A frame as seen by the publisher, borrowed from the pool slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    /// Camera name.
    pub camera: &'a str,
    /// Frame id and sensor timestamp.
    pub metadata: FrameMetadata,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Interleaved RGB, `width * height * 3` bytes.
    pub pixels: &'a [u8],
}

impl FrameRef<'_> {
    /// Copies the frame out of the slot.
    pub fn to_published(&self) -> PublishedFrame {
        PublishedFrame {
            camera: self.camera.to_string(),
            metadata: self.metadata,
            width: self.width,
            height: self.height,
            pixels: self.pixels.to_vec(),
        }
    }
}

/// An owned copy of a delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFrame {
    /// Camera name.
    pub camera: String,
    /// Frame id and sensor timestamp.
    pub metadata: FrameMetadata,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Interleaved RGB, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
}

/// Receives every frame a worker consumes.
///
/// Called on the camera's worker thread while the slot is mapped, so it
/// should copy what it needs and return.
pub trait FramePublisher: Send + Sync {
    /// Delivers one frame downstream.
    fn publish(&self, frame: FrameRef<'_>) -> Result<(), PublishError>;
}

/// Forwards owned frames over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: Sender<PublishedFrame>,
}

impl ChannelPublisher {
    /// Sends on `sender`.
    pub fn new(sender: Sender<PublishedFrame>) -> Self {
        Self { sender }
    }

    /// A publisher with an unbounded channel and its receiving end.
    pub fn unbounded() -> (Self, Receiver<PublishedFrame>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    /// A publisher with a bounded channel. Full channels drop frames.
    pub fn bounded(capacity: usize) -> (Self, Receiver<PublishedFrame>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self::new(sender), receiver)
    }
}

impl FramePublisher for ChannelPublisher {
    fn publish(&self, frame: FrameRef<'_>) -> Result<(), PublishError> {
        match self.sender.try_send(frame.to_published()) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                Err(PublishError::Disconnected)
            }
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                Err(PublishError::Other("downstream channel full".to_string()))
            }
        }
    }
}

/// Discards every frame. Useful when only metrics matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl FramePublisher for NullPublisher {
    fn publish(&self, _frame: FrameRef<'_>) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pixels: &[u8]) -> FrameRef<'_> {
        FrameRef {
            camera: "rear",
            metadata: FrameMetadata {
                frame_id: 3,
                timestamp_ns: 99,
            },
            width: 1,
            height: 1,
            pixels,
        }
    }

    #[test]
    fn test_channel_publisher_forwards_copy() {
        let (publisher, receiver) = ChannelPublisher::unbounded();
        publisher.publish(frame(&[1, 2, 3])).unwrap();

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.camera, "rear");
        assert_eq!(received.metadata.frame_id, 3);
        assert_eq!(received.pixels, vec![1, 2, 3]);
    }

    #[test]
    fn test_disconnected_receiver() {
        let (publisher, receiver) = ChannelPublisher::unbounded();
        drop(receiver);
        assert_eq!(
            publisher.publish(frame(&[0, 0, 0])),
            Err(PublishError::Disconnected)
        );
    }

    #[test]
    fn test_bounded_channel_full() {
        let (publisher, _receiver) = ChannelPublisher::bounded(1);
        publisher.publish(frame(&[0, 0, 0])).unwrap();
        assert!(matches!(
            publisher.publish(frame(&[0, 0, 0])),
            Err(PublishError::Other(_))
        ));
    }
}
