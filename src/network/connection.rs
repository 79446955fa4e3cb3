//! The encrypted connection state machine.
//!
//! Lifecycle: `NotConnected` → `Connecting` → role-specific DH exchange →
//! `Encrypted`. Once encrypted, outer packets are framed as
//! `(paddedSize u32 BE, realSize u32 BE, paddedSize encrypted bytes)` and the
//! cleartext carries zero or more inner commands of
//! `(u16 BE size-hint, u16 LE commandSize, u16 LE commandCode, payload)`.
//!
//! Any parse failure, bound violation, or short read drops the connection:
//! status goes to `NotConnected`, one `ConnectionClosed` message is emitted,
//! and the parser state is discarded.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::constants::{
    BF_NET_KEY_BYTE_SIZE, BLOWFISH_BLOCK_SIZE, CAPTURE_SOURCE_CLIENT, CAPTURE_SOURCE_SERVER,
    DH_BASE_STRING, DH_KEY_HEX_SIZE, MAX_PACKET_SIZE,
};
use crate::crypto::{Blowfish, DiffieHellman};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketReader, PacketView};

use super::capture::CaptureFile;
use super::message::Message;
use super::queue::MessageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Encrypting,
    WaitingEncryption,
    Encrypted,
}

/// Where the connection is in its handshake. Each state has exactly one
/// transition method on [`EncryptedConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingClientPreamble,
    AwaitingServerParams,
    AwaitingClientPublic,
    Framed,
}

struct Outgoing {
    packets: VecDeque<PacketView>,
    sending: bool,
}

struct Shared {
    status: Mutex<ConnectionStatus>,
    outgoing: Mutex<Outgoing>,
    wake: Notify,
}

/// Cloneable handle to a live connection, carried inside queue messages so
/// workers can reply or close.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    remote_address: Arc<str>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote", &self.remote_address)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionHandle {
    fn new(remote_address: String) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            remote_address: remote_address.into(),
            shared: Arc::new(Shared {
                status: Mutex::new(ConnectionStatus::NotConnected),
                outgoing: Mutex::new(Outgoing {
                    packets: VecDeque::new(),
                    sending: false,
                }),
                wake: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock().unwrap()
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.shared.status.lock().unwrap() = status;
    }

    /// Queue one command packet for delivery. The packet data must start
    /// with the little-endian u16 command code, followed by the payload.
    /// Commands are delivered in queue order; coalescing preserves it.
    pub fn send_packet(&self, packet: Packet) {
        self.shared
            .outgoing
            .lock()
            .unwrap()
            .packets
            .push_back(packet.into_view());
        self.shared.wake.notify_one();
    }

    pub fn send_packets(&self, packets: impl IntoIterator<Item = Packet>) {
        {
            let mut outgoing = self.shared.outgoing.lock().unwrap();
            for p in packets {
                outgoing.packets.push_back(p.into_view());
            }
        }
        self.shared.wake.notify_one();
    }

    /// Ask the connection to close. Pending reads and writes are cancelled
    /// and one `ConnectionClosed` message is emitted by the run loop.
    pub fn request_close(&self) {
        self.set_status(ConnectionStatus::NotConnected);
        self.shared.wake.notify_one();
    }

    /// Coalesce queued packets into one batch bounded by `MAX_PACKET_SIZE`,
    /// unless a send is already in flight.
    fn take_outgoing_batch(&self) -> Vec<PacketView> {
        let mut outgoing = self.shared.outgoing.lock().unwrap();
        if outgoing.sending {
            return Vec::new();
        }

        let mut batch = Vec::new();
        let mut total = 8u32;
        while let Some(next) = outgoing.packets.front() {
            let framed = next.size() + 4;
            if (total + framed) as usize >= MAX_PACKET_SIZE {
                break;
            }
            total += framed;
            batch.push(outgoing.packets.pop_front().unwrap());
        }

        outgoing.sending = !batch.is_empty();
        batch
    }

    fn finish_send(&self) {
        let mut outgoing = self.shared.outgoing.lock().unwrap();
        outgoing.sending = false;
    }
}

/// Pre-encryption extension hook: inspects the first packet when it is not
/// the expected preamble. Returning `false` fails the connection.
pub type ExtensionHandler = Box<dyn FnMut(&mut Packet) -> bool + Send>;

/// Payload decompression hook, run after decryption and before command
/// splitting. Receives the decrypted outer packet plus its padded and real
/// sizes and returns the sizes of the decompressed payload.
pub type DecompressHandler =
    Box<dyn Fn(&mut Packet, u32, u32) -> Result<(u32, u32)> + Send + Sync>;

/// One end of an encrypted connection over any byte stream.
pub struct EncryptedConnection<S> {
    stream: Option<S>,
    role: ConnectionRole,
    handle: ConnectionHandle,
    queue: Weak<MessageQueue<Message>>,
    diffie_hellman: Option<DiffieHellman>,
    session_key: Option<Arc<Blowfish>>,
    capture_path: Option<String>,
    capture: Option<CaptureFile>,
    extension: Option<ExtensionHandler>,
    decompress: Option<Arc<DecompressHandler>>,
    state: ParserState,
    closed_emitted: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> EncryptedConnection<S> {
    /// Client role: initiates the preamble and parses the server's DH
    /// parameters.
    pub fn client(
        stream: S,
        remote_address: String,
        queue: Weak<MessageQueue<Message>>,
    ) -> Self {
        Self {
            stream: Some(stream),
            role: ConnectionRole::Client,
            handle: ConnectionHandle::new(remote_address),
            queue,
            diffie_hellman: None,
            session_key: None,
            capture_path: None,
            capture: None,
            extension: None,
            decompress: None,
            state: ParserState::AwaitingServerParams,
            closed_emitted: false,
        }
    }

    /// Server role: waits for the preamble and offers the configured prime.
    pub fn server(
        stream: S,
        remote_address: String,
        dh_prime: &str,
        queue: Weak<MessageQueue<Message>>,
    ) -> Result<Self> {
        Ok(Self {
            stream: Some(stream),
            role: ConnectionRole::Server,
            handle: ConnectionHandle::new(remote_address),
            queue,
            diffie_hellman: Some(DiffieHellman::new(dh_prime)?),
            session_key: None,
            capture_path: None,
            capture: None,
            extension: None,
            decompress: None,
            state: ParserState::AwaitingClientPreamble,
            closed_emitted: false,
        })
    }

    /// Record decrypted traffic under `dir` once the connection is
    /// encrypted.
    pub fn with_capture_path(mut self, dir: &str) -> Self {
        self.capture_path = Some(dir.to_string());
        self
    }

    pub fn set_extension_handler(&mut self, handler: ExtensionHandler) {
        self.extension = Some(handler);
    }

    /// Install payload decompression for the framed phase. Without one the
    /// cleartext is used as-is.
    pub fn set_decompress_handler(&mut self, handler: DecompressHandler) {
        self.decompress = Some(Arc::new(handler));
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Drive the connection to completion. Emits `Encrypted` after the
    /// handshake and exactly one `ConnectionClosed` when the connection
    /// ends, however it ends.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;

        if let Err(ref e) = result {
            if self.handle.status() != ConnectionStatus::NotConnected {
                tracing::debug!(
                    "[net] {} disconnect: {} ({e})",
                    match self.role {
                        ConnectionRole::Client => "server",
                        ConnectionRole::Server => "client",
                    },
                    self.handle.remote_address()
                );
            }
        }

        self.close();
        result
    }

    async fn drive(&mut self) -> Result<()> {
        self.handle.set_status(ConnectionStatus::Connecting);

        match self.role {
            ConnectionRole::Client => self.client_handshake().await?,
            ConnectionRole::Server => self.server_handshake().await?,
        }

        self.connection_encrypted();

        let stream = self.stream.take().expect("stream present until split");
        let key = self
            .session_key
            .clone()
            .expect("session key set by handshake");
        let (rd, wr) = tokio::io::split(stream);

        tokio::select! {
            r = read_loop(
                rd,
                self.role,
                Arc::clone(&key),
                self.handle.clone(),
                self.queue.clone(),
                self.decompress.clone(),
                &mut self.capture,
            ) => r,
            w = write_loop(wr, key, self.handle.clone()) => w,
        }
    }

    async fn client_handshake(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().unwrap();

        let mut preamble = Packet::new();
        preamble.write_u32_be(1)?;
        preamble.write_u32_be(8)?;
        stream.write_all(preamble.data()).await?;
        stream.flush().await?;

        self.handle.set_status(ConnectionStatus::Encrypting);

        let expected = DH_BASE_STRING.len() + 2 * DH_KEY_HEX_SIZE + 16;
        let mut buf = vec![0u8; expected];
        self.stream.as_mut().unwrap().read_exact(&mut buf).await?;

        let mut packet = Packet::from_bytes(&buf)?;
        let reply = self.parse_server_params(&mut packet)?;

        let stream = self.stream.as_mut().unwrap();
        stream.write_all(reply.data()).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn server_handshake(&mut self) -> Result<()> {
        let mut buf = [0u8; 8];
        self.stream.as_mut().unwrap().read_exact(&mut buf).await?;

        let mut packet = Packet::from_bytes(&buf)?;
        let reply = self.parse_client_preamble(&mut packet)?;

        let stream = self.stream.as_mut().unwrap();
        stream.write_all(reply.data()).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 4];
        self.stream.as_mut().unwrap().read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len as usize > DH_KEY_HEX_SIZE {
            return Err(Error::Protocol(
                "failed to parse encryption client public".into(),
            ));
        }

        let mut body = vec![0u8; len as usize];
        self.stream.as_mut().unwrap().read_exact(&mut body).await?;

        let mut packet = Packet::new();
        packet.write_u32_be(len)?;
        packet.write_array(&body)?;
        packet.rewind();
        self.parse_client_public(&mut packet)
    }

    /// Server transition: validate the `(1, 8)` preamble and reply with the
    /// reserved zeros, base, prime and server public value.
    fn parse_client_preamble(&mut self, packet: &mut Packet) -> Result<Packet> {
        debug_assert_eq!(self.state, ParserState::AwaitingClientPreamble);

        let first = packet.read_u32_be()?;
        let second = packet.read_u32_be()?;

        if packet.left() != 0 || first != 1 || second != 8 {
            packet.rewind();
            let handled = match self.extension.as_mut() {
                Some(handler) => handler(packet),
                None => false,
            };
            if !handled {
                return Err(Error::Protocol(
                    "unexpected pre-encryption traffic".into(),
                ));
            }
        }

        self.handle.set_status(ConnectionStatus::WaitingEncryption);

        let dh = self
            .diffie_hellman
            .as_mut()
            .ok_or_else(|| Error::Crypto("no DH parameters loaded".into()))?;
        let public = dh.generate_public();

        let mut reply = Packet::new();
        reply.write_blank(4)?;
        reply.write_string32_be(Encoding::Utf8, DH_BASE_STRING, false)?;
        reply.write_string32_be(Encoding::Utf8, dh.prime(), false)?;
        reply.write_string32_be(Encoding::Utf8, &public, false)?;

        self.state = ParserState::AwaitingClientPublic;
        Ok(reply)
    }

    /// Client transition: validate the server's base/prime/public message,
    /// derive the session key, and produce the client public reply.
    fn parse_server_params(&mut self, packet: &mut Packet) -> Result<Packet> {
        debug_assert_eq!(self.state, ParserState::AwaitingServerParams);

        if packet.read_u32_be()? != 0 {
            return Err(Error::Protocol("failed to parse encryption data".into()));
        }

        if packet.peek_u32_be()? as usize != DH_BASE_STRING.len() {
            return Err(Error::Protocol("failed to parse encryption base".into()));
        }
        let base = packet.read_string32_be(Encoding::Utf8, false)?;
        if base != DH_BASE_STRING {
            return Err(Error::Protocol(format!(
                "failed to parse encryption base (not {DH_BASE_STRING})"
            )));
        }

        if packet.peek_u32_be()? as usize != DH_KEY_HEX_SIZE {
            return Err(Error::Protocol("failed to parse encryption prime".into()));
        }
        let prime = packet.read_string32_be(Encoding::Utf8, false)?;

        if packet.peek_u32_be()? as usize != DH_KEY_HEX_SIZE {
            return Err(Error::Protocol(
                "failed to parse encryption server public".into(),
            ));
        }
        let server_public = packet.read_string32_be(Encoding::Utf8, false)?;

        if packet.left() != 0 {
            return Err(Error::Protocol("read too much data for packet".into()));
        }

        self.handle.set_status(ConnectionStatus::WaitingEncryption);

        let mut dh = DiffieHellman::new(&prime)?;
        let client_public = dh.generate_public();
        let shared = dh.generate_secret(&server_public)?;
        if shared.len() != BF_NET_KEY_BYTE_SIZE {
            return Err(Error::Crypto(
                "failed to generate encryption client public and shared data".into(),
            ));
        }

        let mut reply = Packet::new();
        reply.write_string32_be(Encoding::Utf8, &client_public, false)?;

        self.session_key = Some(Arc::new(Blowfish::new(&shared)?));
        self.diffie_hellman = Some(dh);
        self.handle.set_status(ConnectionStatus::Encrypted);
        self.state = ParserState::Framed;

        Ok(reply)
    }

    /// Server transition: read the client public value and derive the
    /// session key.
    fn parse_client_public(&mut self, packet: &mut Packet) -> Result<()> {
        debug_assert_eq!(self.state, ParserState::AwaitingClientPublic);

        if packet.peek_u32_be()? as usize > DH_KEY_HEX_SIZE {
            return Err(Error::Protocol(
                "failed to parse encryption client public".into(),
            ));
        }
        let client_public = packet.read_string32_be(Encoding::Utf8, false)?;

        if packet.left() != 0 {
            return Err(Error::Protocol("read too much data for packet".into()));
        }

        let dh = self
            .diffie_hellman
            .as_mut()
            .ok_or_else(|| Error::Crypto("no DH parameters loaded".into()))?;
        let shared = dh.generate_secret(&client_public)?;
        if shared.len() != BF_NET_KEY_BYTE_SIZE {
            return Err(Error::Crypto("failed to generate shared data".into()));
        }

        self.session_key = Some(Arc::new(Blowfish::new(&shared)?));
        self.handle.set_status(ConnectionStatus::Encrypted);
        self.state = ParserState::Framed;

        Ok(())
    }

    fn connection_encrypted(&mut self) {
        tracing::debug!("[net] connection encrypted: {}", self.handle.remote_address());

        if let Some(dir) = self.capture_path.as_deref() {
            match CaptureFile::create(dir, self.handle.remote_address()) {
                Ok(capture) => self.capture = Some(capture),
                Err(e) => {
                    tracing::error!("[net] failed to open capture file under {dir}: {e}");
                }
            }
        }

        if let Some(queue) = self.queue.upgrade() {
            queue.enqueue(Message::Encrypted(self.handle.clone()));
        }
    }

    /// Transition to `NotConnected` and emit `ConnectionClosed` exactly
    /// once, whether the close came from a peer, a parse failure, or the
    /// application.
    fn close(&mut self) {
        self.handle.set_status(ConnectionStatus::NotConnected);
        self.state = ParserState::Framed;

        if !self.closed_emitted {
            self.closed_emitted = true;
            if let Some(queue) = self.queue.upgrade() {
                queue.enqueue(Message::ConnectionClosed(self.handle.clone()));
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut rd: R,
    role: ConnectionRole,
    key: Arc<Blowfish>,
    handle: ConnectionHandle,
    queue: Weak<MessageQueue<Message>>,
    decompress: Option<Arc<DecompressHandler>>,
    capture: &mut Option<CaptureFile>,
) -> Result<()> {
    loop {
        let mut header = [0u8; 8];
        rd.read_exact(&mut header).await?;

        let padded = u32::from_be_bytes(header[0..4].try_into().unwrap()) as usize;
        if padded == 0 || padded % BLOWFISH_BLOCK_SIZE != 0 || padded + 8 > MAX_PACKET_SIZE {
            return Err(Error::Protocol("invalid encrypted frame size".into()));
        }

        let mut body = vec![0u8; padded];
        rd.read_exact(&mut body).await?;

        let mut packet = Packet::new();
        packet.write_array(&header)?;
        packet.write_array(&body)?;

        parse_frame(
            &mut packet,
            role,
            &key,
            &handle,
            &queue,
            decompress.as_deref(),
            capture,
        )?;

        if handle.status() != ConnectionStatus::Encrypted {
            return Ok(());
        }
    }
}

/// Framed transition: decrypt one outer packet, capture it, and split it
/// into inner commands enqueued in encounter order.
fn parse_frame(
    packet: &mut Packet,
    role: ConnectionRole,
    key: &Blowfish,
    handle: &ConnectionHandle,
    queue: &Weak<MessageQueue<Message>>,
    decompress: Option<&DecompressHandler>,
    capture: &mut Option<CaptureFile>,
) -> Result<()> {
    key.decrypt_packet(packet)?;

    if let Some(cap) = capture.as_mut() {
        let source = match role {
            ConnectionRole::Server => CAPTURE_SOURCE_CLIENT,
            ConnectionRole::Client => CAPTURE_SOURCE_SERVER,
        };
        if let Err(e) = cap.record(source, packet.data()) {
            tracing::error!("[net] failed to write capture file: {e}");
            *capture = None;
        }
    }

    packet.rewind();
    let mut padded_size = packet.read_u32_be()?;
    let mut real_size = packet.read_u32_be()?;

    if let Some(decompress) = decompress {
        (padded_size, real_size) = decompress(packet, padded_size, real_size)?;
    }

    if real_size > padded_size {
        return Err(Error::Protocol("corrupt packet sizes".into()));
    }
    let padding = padded_size - real_size;

    let view = std::mem::take(packet).into_view();
    let mut cursor = view.view(8, view.size() - 8)?;

    let queue = queue
        .upgrade()
        .ok_or_else(|| Error::Protocol("no message queue for packet".into()))?;

    while cursor.left() > padding {
        if cursor.left() < 6 {
            return Err(Error::Protocol(
                "corrupt packet (not enough data for command header)".into(),
            ));
        }

        // The leading big-endian size hint is ignored.
        cursor.skip(2)?;

        let command_start = cursor.tell();
        let command_size = cursor.read_u16_le()? as u32;
        let command_code = cursor.read_u16_le()?;

        if command_size < 4 {
            return Err(Error::Protocol(
                "corrupt packet (not enough data for command)".into(),
            ));
        }

        if cursor.left() < command_size - 4 {
            return Err(Error::Protocol(
                "corrupt packet (not enough data for command data)".into(),
            ));
        }

        let data = cursor.view(command_start + 4, command_size - 4)?;
        queue.enqueue(Message::Command {
            connection: handle.clone(),
            command_code,
            data,
        });

        cursor.seek(command_start + command_size)?;
    }

    cursor.skip(padding)?;
    if cursor.left() != 0 {
        return Err(Error::Protocol("corrupt packet has extra data".into()));
    }

    Ok(())
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut wr: W,
    key: Arc<Blowfish>,
    handle: ConnectionHandle,
) -> Result<()> {
    loop {
        handle.shared.wake.notified().await;

        if handle.status() == ConnectionStatus::NotConnected {
            return Ok(());
        }

        loop {
            let batch = handle.take_outgoing_batch();
            if batch.is_empty() {
                break;
            }

            let outer = prepare_packets(&batch, &key)?;
            let mut result = wr.write_all(outer.data()).await;
            if result.is_ok() {
                result = wr.flush().await;
            }
            handle.finish_send();
            result?;
        }
    }
}

/// Frame a batch of command packets into one encrypted outer packet.
fn prepare_packets(packets: &[PacketView], key: &Blowfish) -> Result<Packet> {
    let mut outer = Packet::new();
    outer.write_blank(8)?;

    for p in packets {
        outer.write_u16_be(p.size() as u16 + 2)?;
        outer.write_u16_le(p.size() as u16 + 2)?;
        outer.write_array(p.data())?;
    }

    key.encrypt_packet(&mut outer)?;
    Ok(outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MessageQueue;

    fn frame_with_commands(key: &Blowfish, commands: &[(u16, &[u8])]) -> Packet {
        let mut views = Vec::new();
        for (code, payload) in commands {
            let mut p = Packet::new();
            p.write_u16_le(*code).unwrap();
            p.write_array(payload).unwrap();
            views.push(p.into_view());
        }
        prepare_packets(&views, key).unwrap()
    }

    #[test]
    fn test_command_split_in_order() {
        let key = Blowfish::new(b"testkey1").unwrap();
        let handle = ConnectionHandle::new("test".into());
        let queue = Arc::new(MessageQueue::new());
        let mut capture = None;

        let mut frame = frame_with_commands(&key, &[(0x0026, b"P1"), (0x0056, b"P2P2")]);
        parse_frame(
            &mut frame,
            ConnectionRole::Server,
            &key,
            &handle,
            &Arc::downgrade(&queue),
            None,
            &mut capture,
        )
        .unwrap();

        let messages = queue.try_dequeue_all();
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::Command {
                command_code, data, ..
            } => {
                assert_eq!(*command_code, 0x0026);
                assert_eq!(data.to_vec(), b"P1");
            }
            other => panic!("expected command, got {other:?}"),
        }
        match &messages[1] {
            Message::Command {
                command_code, data, ..
            } => {
                assert_eq!(*command_code, 0x0056);
                assert_eq!(data.to_vec(), b"P2P2");
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_undersized_command_is_corrupt() {
        let key = Blowfish::new(b"testkey1").unwrap();
        let handle = ConnectionHandle::new("test".into());
        let queue = Arc::new(MessageQueue::new());
        let mut capture = None;

        // Hand-build a frame whose commandSize is 3 (< 4).
        let mut outer = Packet::new();
        outer.write_blank(8).unwrap();
        outer.write_u16_be(3).unwrap();
        outer.write_u16_le(3).unwrap();
        outer.write_u16_le(0x0026).unwrap();
        key.encrypt_packet(&mut outer).unwrap();

        let err = parse_frame(
            &mut outer,
            ConnectionRole::Server,
            &key,
            &handle,
            &Arc::downgrade(&queue),
            None,
            &mut capture,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_padding_must_not_hide_commands() {
        let key = Blowfish::new(b"testkey1").unwrap();
        let handle = ConnectionHandle::new("test".into());
        let queue = Arc::new(MessageQueue::new());
        let mut capture = None;

        // realSize pretends the whole body is padding while a command sits
        // in it; the parser must not emit anything and must not error on the
        // padding skip.
        let mut outer = Packet::new();
        outer.write_blank(8).unwrap();
        outer.write_u16_be(6).unwrap();
        outer.write_u16_le(6).unwrap();
        outer.write_u16_le(0x0001).unwrap();
        outer.write_u16_le(0xFFFF).unwrap();
        key.encrypt_packet(&mut outer).unwrap();

        // Rewrite realSize to zero after encryption.
        outer.seek(4).unwrap();
        outer.write_u32_be(0).unwrap();
        outer.end();

        let result = parse_frame(
            &mut outer,
            ConnectionRole::Server,
            &key,
            &handle,
            &Arc::downgrade(&queue),
            None,
            &mut capture,
        );

        // Everything is padding; no commands may be emitted.
        assert!(result.is_ok());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_outgoing_coalescing_respects_cap() {
        let handle = ConnectionHandle::new("test".into());

        for _ in 0..3 {
            let mut p = Packet::new();
            p.write_u16_le(1).unwrap();
            p.write_blank(6000).unwrap();
            handle.send_packet(p);
        }

        // 3 × 6006 framed bytes cannot fit one 16 KiB outer packet.
        let batch = handle.take_outgoing_batch();
        assert_eq!(batch.len(), 2);

        // A second call while sending is in flight yields nothing.
        assert!(handle.take_outgoing_batch().is_empty());

        handle.finish_send();
        let rest = handle.take_outgoing_batch();
        assert_eq!(rest.len(), 1);
    }
}
