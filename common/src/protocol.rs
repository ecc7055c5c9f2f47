//! Protocol definition for the frame data socket.
//!
use serde::{Deserialize, Serialize};

/// Definition of protocol messages.
#[derive(Debug, Deserialize, Serialize)]
pub enum ProtoMsg {
    FrameMsg(FrameMsg),
}

/// A single captured frame, encoded as JPEG.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FrameMsg {
    /// Name of the stream the frame belongs to.
    pub id: String,
    /// JPEG-encoded frame data.
    pub data: Vec<u8>,
}

impl FrameMsg {
    pub fn new(id: String, data: Vec<u8>) -> Self {
        Self { id, data }
    }
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}
