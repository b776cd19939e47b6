//! # gateway-protocol
//!
//! Wire protocol for the gateway: opcodes, close codes, message envelope,
//! handshake payloads, dispatch event tags, and the frame codec.

pub mod close_codes;
pub mod codec;
pub mod events;
pub mod intents;
pub mod messages;
pub mod opcodes;
pub mod payloads;
pub mod session;

pub use close_codes::{CloseCode, RESUME_CLOSE_CODE};
pub use codec::{CodecError, CompressionBuffer, CompressionMethod, FrameCodec, ZLIB_SUFFIX};
pub use events::GatewayEventType;
pub use intents::GatewayIntents;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
};
pub use session::{SessionInfo, ShardId};
