// moonlapse_protocol: wire protocol for the Moonlapse chat relay.
//
// This crate defines the message type and the length-prefixed framing used
// by the relay server (`moonlapse_relay`) and its clients. It is shared by
// both sides and knows nothing about sockets, threads or game state.
//
// Module overview:
// - `types.rs`:    `ConnectionId`, the registry-assigned peer ID.
// - `message.rs`:  `Message` (sender, header, body) and the `SAY` header.
// - `framing.rs`:  Encoding, strict one-shot decoding, and stream decoding
//                  (`FrameBuffer`, `FrameDecoder`, `FramingMode`).
//
// Design decisions:
// - **Text fields, byte lengths.** Every field is a UTF-8 string whose
//   length prefix counts bytes, so multibyte text round-trips.
// - **No async runtime.** Framing works on byte slices and `std::io::Write`,
//   usable from blocking TCP streams and in-memory buffers alike.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{
    DEFAULT_MAX_FIELD_LEN, FrameBuffer, FrameDecoder, FrameError, FramingMode, decode,
    decode_frame, encode, encode_message, write_frame,
};
pub use message::{Message, SAY};
pub use types::ConnectionId;
