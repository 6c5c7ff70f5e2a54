// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starting interactive key verifications.
//!
//! The interactive session machine (emoji comparison, QR scanning, …) is a
//! separate subsystem; this crate only needs the ability to kick one off.
//! Everything that requires a client (resolving direct rooms, creating and
//! registering sessions) sits behind [`VerificationSessions`].
use async_trait::async_trait;
use thiserror::Error;

/// Collaborator able to create and start verification sessions.
#[async_trait]
pub trait VerificationSessions {
    type Session;
    type Error: std::error::Error;

    /// Resolves (or creates) the direct room shared with the given user.
    async fn direct_room(&self, user_id: &str) -> Result<Option<String>, Self::Error>;

    /// Creates and starts a verification session inside a room.
    async fn start_room_session(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Self::Session, Self::Error>;

    /// Creates, starts and registers a session broadcast towards the given
    /// user's devices.
    async fn start_broadcast_session(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Self::Session, Self::Error>;
}

#[derive(Debug, Error)]
pub enum VerificationError<E> {
    /// No direct room with the target user could be obtained.
    #[error("no direct room with the target user could be obtained")]
    RoomCreationFailed,

    #[error("{0}")]
    Sessions(E),
}
