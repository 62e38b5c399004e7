// TCP client for the chat relay.
//
// Architecture:
// - `connect()` opens the socket on the calling thread, then spawns a
//   background reader thread that decodes frames and hands each message to
//   a caller-supplied handler (the chat binary prints them; tests push them
//   into a channel via `connect_channel`).
// - The calling thread keeps the write side and sends frames with `send` /
//   `say`. Every outgoing frame carries the socket's local address as its
//   sender.
// - `shutdown()` half-closes the write side, waits for the reader to see the
//   server close its side, then closes the socket.
//
// Incoming bytes always go through a buffered `FrameDecoder`: the relay may
// coalesce several frames into one read, or split one across reads.

use std::io::{self, BufRead, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use moonlapse_protocol::{
    DEFAULT_MAX_FIELD_LEN, FrameDecoder, FrameError, FramingMode, Message, SAY, write_frame,
};

use crate::error::ClientError;

/// Why the background reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The server closed its side.
    EndOfStream,
    /// The server sent bytes that are not a frame.
    Malformed(FrameError),
    /// The socket failed.
    Io(io::Error),
}

/// TCP client for relay communication.
pub struct NetClient {
    stream: TcpStream,
    local_addr: String,
    peer_addr: SocketAddr,
    reader_thread: Option<JoinHandle<ReaderExit>>,
}

impl NetClient {
    /// Connect to a relay and spawn the reader thread. `on_message` runs on
    /// that thread once per received message, in arrival order.
    pub fn connect<F>(addr: &str, on_message: F) -> Result<Self, ClientError>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let stream = TcpStream::connect(addr).map_err(|source| ClientError::Connect {
            addr: addr.into(),
            source,
        })?;
        let local_addr = stream.local_addr()?.to_string();
        let peer_addr = stream.peer_addr()?;

        let reader_stream = stream.try_clone()?;
        let reader_thread = thread::Builder::new()
            .name("chat-reader".into())
            .spawn(move || reader_loop(reader_stream, on_message))?;

        tracing::debug!(%peer_addr, local = %local_addr, "connected to relay");
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
            reader_thread: Some(reader_thread),
        })
    }

    /// Connect and deliver received messages into a channel instead of a
    /// callback.
    pub fn connect_channel(addr: &str) -> Result<(Self, Receiver<Message>), ClientError> {
        let (tx, rx) = mpsc::channel();
        let client = Self::connect(addr, move |msg| {
            // Receiver dropped: nobody is listening any more.
            let _ = tx.send(msg);
        })?;
        Ok((client, rx))
    }

    /// This end's socket address, used as the sender of every frame.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one frame with the given header and body.
    pub fn send(&mut self, header: &str, body: &str) -> Result<(), ClientError> {
        let msg = Message::new(self.local_addr.as_str(), header, body);
        write_frame(&mut self.stream, &msg)?;
        Ok(())
    }

    /// Send a chat line.
    pub fn say(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(SAY, text)
    }

    /// Half-close, wait for the reader to finish, then close fully.
    pub fn shutdown(mut self) -> Result<ReaderExit, ClientError> {
        match self.stream.shutdown(Shutdown::Write) {
            Ok(()) => {}
            // The server already dropped us; the reader has or will see it.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        let exit = match self.reader_thread.take() {
            Some(handle) => handle.join().map_err(|_| ClientError::ReaderPanicked)?,
            None => ReaderExit::EndOfStream,
        };
        tracing::debug!(?exit, "reader finished");
        Ok(exit)
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        // Unblocks the reader if `shutdown` was never called.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Reader thread: decode frames until the stream ends.
fn reader_loop<F: FnMut(Message)>(mut stream: TcpStream, mut on_message: F) -> ReaderExit {
    let mut decoder = FrameDecoder::new(FramingMode::Buffered, DEFAULT_MAX_FIELD_LEN);
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return ReaderExit::EndOfStream,
            Ok(n) => match decoder.feed(&buf[..n]) {
                Ok(messages) => messages.into_iter().for_each(&mut on_message),
                Err(e) => return ReaderExit::Malformed(e),
            },
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return ReaderExit::Io(e),
        }
    }
}

/// Send each line of `input` as a chat message until an empty line or end
/// of input, then shut the client down.
pub fn run_interactive<R: BufRead>(
    mut client: NetClient,
    mut input: R,
) -> Result<ReaderExit, ClientError> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            break;
        }
        client.say(text)?;
    }
    client.shutdown()
}
