//! Connection-side session actors.

mod close;
mod handle;

pub use close::CloseCode;
pub use handle::{Session, SessionError, SessionId, UserId, OUTBOUND_BUFFER_SIZE};
