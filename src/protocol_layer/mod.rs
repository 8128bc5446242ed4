//! The protocol layer contract, through which the policy engine exchanges messages.
//!
//! Framing, GoodCRC handling, retries and message ID sequencing all live below this trait.
//! Upon reception of a message, the protocol layer stores it, such that it can be retrieved by
//! [`ProtocolLayer::rx_message`], and posts its [`MessageEvent`] marker into the shared
//! [`EventLatch`].
pub mod message;

use message::Message;

use crate::events::{EventLatch, MessageEvent};

/// Trait for the protocol layer.
pub trait ProtocolLayer {
    /// Transmit a message.
    ///
    /// Returns whether the transmission was acknowledged by the port partner.
    fn send_message(&mut self, message: &Message) -> bool;

    /// The latch that holds received-message markers, resets, attach state and commands.
    fn events(&self) -> &EventLatch;

    /// The message that was received most recently.
    fn rx_message(&self) -> &Message;

    /// Reset message ID counters and drop pending receptions.
    fn reset(&mut self);

    /// Poll and consume a received-message marker.
    fn get_status(&self, event: MessageEvent) -> bool {
        self.events().take_message(event)
    }
}
