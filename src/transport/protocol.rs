//! Wire-level constants and command tags.
//!
//! Request framing: [4-byte ASCII command][16-byte ASCII decimal length][body]
//! Response framing: [ASCII decimal length]["\n"][body]

/// Width of a command tag in bytes.
pub const COMMAND_TAG_LEN: usize = 4;

/// Width of the fixed request length header in bytes.
pub const LENGTH_HEADER_LEN: usize = 16;

/// Upper bound on bytes requested from the stream per read call.
pub const RECV_CHUNK_SIZE: usize = 2048;

/// Default maximum request body size (64 MB). Safety valve against malformed headers.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const STOP_TAG: &[u8; COMMAND_TAG_LEN] = b"STOP";
const DATA_TAG: &[u8; COMMAND_TAG_LEN] = b"DATA";

/// Command sent by the peer ahead of every unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// End the session.
    Stop,
    /// A length-prefixed request follows.
    Data,
}

impl Command {
    /// Match a raw tag against the known commands.
    pub fn from_tag(tag: &[u8; COMMAND_TAG_LEN]) -> Option<Self> {
        match tag {
            STOP_TAG => Some(Self::Stop),
            DATA_TAG => Some(Self::Data),
            _ => None,
        }
    }

    /// The on-wire tag for this command.
    pub const fn tag(self) -> &'static [u8; COMMAND_TAG_LEN] {
        match self {
            Self::Stop => STOP_TAG,
            Self::Data => DATA_TAG,
        }
    }
}

/// Encode a request body the way the peer frames it (used by tests and tooling).
pub fn encode_request(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMAND_TAG_LEN + LENGTH_HEADER_LEN + body.len());
    out.extend_from_slice(DATA_TAG);
    out.extend_from_slice(format!("{:0>width$}", body.len(), width = LENGTH_HEADER_LEN).as_bytes());
    out.extend_from_slice(body);
    out
}
