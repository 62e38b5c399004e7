// The one message type carried by the relay.
//
// A `Message` is three text fields: who sent it (`sender`, usually the
// peer's socket address string), what kind of message it is (`header`,
// e.g. `SAY`), and the payload (`body`). The relay never interprets
// `header` or `body`; mapping headers to game actions is the consumer's job.
//
// `Display` renders the console form used by the chat client:
// `[sender] [header] body`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Header tag for plain chat text.
pub const SAY: &str = "SAY";

/// A decoded (or about-to-be-encoded) relay message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub header: String,
    pub body: String,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        header: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            header: header.into(),
            body: body.into(),
        }
    }

    /// Chat line from `sender`.
    pub fn say(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(sender, SAY, text)
    }

    /// True if this is a chat line.
    pub fn is_say(&self) -> bool {
        self.header == SAY
    }

    /// Same header and body, attributed to a different sender. The relay
    /// uses this to stamp frames with the originating socket address.
    pub fn with_sender(self, sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ..self
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}] {}", self.sender, self.header, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_console_format() {
        let msg = Message::say("127.0.0.1:50000", "hello there");
        assert_eq!(msg.to_string(), "[127.0.0.1:50000] [SAY] hello there");
    }

    #[test]
    fn with_sender_keeps_header_and_body() {
        let msg = Message::new("spoofed", "MOVE", "north").with_sender("10.0.0.2:4411");
        assert_eq!(msg.sender, "10.0.0.2:4411");
        assert_eq!(msg.header, "MOVE");
        assert_eq!(msg.body, "north");
        assert!(!msg.is_say());
    }

    #[test]
    fn serde_shape_is_flat() {
        let msg = Message::say("a", "b");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"sender":"a","header":"SAY","body":"b"}"#);
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
