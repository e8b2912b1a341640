//! Protocol module containing the dispatcher message types and the JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_action, decode_get_status, decode_launch_plan, decode_request_id, CodecError,
};
pub use messages::*;
