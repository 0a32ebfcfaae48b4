//! Push Subscriber Loop
//!
//! Receives frames from the gateway's publish socket and hands each one,
//! undecoded, to the raw-frame emitter under [`RECV_MESSAGE`]. The loop
//! finishes dispatching one frame before receiving the next.
//!
//! # Exit Conditions
//!
//! - cancellation token fired
//! - a frame containing [`STOP_SENTINEL`]
//! - a transport error on the push channel

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::emitter::EventEmitter;
use crate::application::ports::PushChannel;

/// Raw-tier event carrying each received frame.
pub const RECV_MESSAGE: &str = "RECV_MESSAGE";

/// Reserved byte pattern that ends the loop when seen in a frame.
pub const STOP_SENTINEL: &[u8] = b"__bridge_stop__";

/// A raw pushed frame.
pub type Frame = Arc<[u8]>;

/// Whether the frame asks the loop to stop.
#[must_use]
pub fn is_stop_frame(frame: &[u8]) -> bool {
    frame
        .windows(STOP_SENTINEL.len())
        .any(|window| window == STOP_SENTINEL)
}

/// Receive loop over one push channel.
pub struct PushSubscriber {
    channel: Box<dyn PushChannel>,
    frames: Arc<EventEmitter<Frame>>,
    cancel: CancellationToken,
}

impl PushSubscriber {
    /// Create a loop that emits into `frames` until `cancel` fires.
    #[must_use]
    pub fn new(
        channel: Box<dyn PushChannel>,
        frames: Arc<EventEmitter<Frame>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel,
            frames,
            cancel,
        }
    }

    /// Run until an exit condition.
    ///
    /// Returns the channel for reuse, or `None` if it failed.
    pub async fn run(mut self) -> Option<Box<dyn PushChannel>> {
        tracing::info!("Push subscriber started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::info!("Push subscriber cancelled");
                    return Some(self.channel);
                }

                received = self.channel.recv() => match received {
                    Ok(frame) => {
                        if is_stop_frame(&frame) {
                            tracing::info!("Push subscriber received stop frame");
                            return Some(self.channel);
                        }
                        self.frames.emit(RECV_MESSAGE, Frame::from(frame)).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Push channel failed, subscriber stopping");
                        return None;
                    }
                },
            }
        }
    }
}
