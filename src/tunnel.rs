//! Outbound connection abstraction
//!
//! This module defines the trait for tunneling messages from a room to one
//! connected participant. The room logic never talks to a transport
//! directly; it looks tunnels up by participant [`Id`](crate::watcher::Id)
//! through a `tunnel_finder` closure and pushes messages into them.

use super::{SyncMessage, UpdateMessage};

/// Trait for sending messages through a communication tunnel
///
/// Implementations might wrap a WebSocket, a socket.io bridge or an
/// in-process channel. Delivery is assumed to be ordered per tunnel.
pub trait Tunnel {
    /// Sends an incremental update to the participant
    ///
    /// Updates describe a change the participant should apply on top of
    /// the view it already has.
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a full state synchronization to the participant
    ///
    /// Sync messages replace the participant's view, typically right after
    /// it connects or reconnects.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the tunnel
    fn close(self);
}
