//! Group module - multicast membership and control frames.
//!
//! Clients join named groups and ask the server to forward a message to every
//! member of one or more groups. The server owns a [`GroupRouter`]; control
//! frames are encoded and decoded by the functions re-exported here.

mod control;
mod router;

pub use control::{
    encode_join, encode_transmit, is_control_mark, ControlFrame, GROUP_TRANSMIT_LOOP_BACK_MARK,
    GROUP_TRANSMIT_MARK, JOIN_GROUP_MARK, MAX_GROUP_DESCRIPTOR_LEN,
};
pub use router::GroupRouter;
