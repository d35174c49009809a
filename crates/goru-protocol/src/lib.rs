//! The in-band stderr framing protocol that carries host calls, their
//! replies, and session control signals without corrupting a guest's real
//! diagnostic output on the same stream.

pub mod codec;
pub mod frame;

pub use codec::{GuestStdin, ProtocolCodec, Signal};
pub use frame::Frame;
