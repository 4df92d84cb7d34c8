//! Streaming batch sessions: upload batches while earlier ones process.

mod protocol;
mod stream;

pub use protocol::{
    ClientMessage, ConfigUpdate, JobResultEvent, Outbound, ProtocolError, ServerEvent,
    MAX_TEXT_FRAME,
};
pub use stream::{Frame, SessionControl, StreamSession};
