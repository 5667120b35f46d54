//! SFTP client over an independent SSH connection.
//!
//! Each relay session dials its own SSH connection from cached credentials;
//! the interactive session's connection is never shared, so backpressure on a
//! file transfer cannot stall the terminal. SFTP requests carry a request id
//! and a background task routes responses back to their callers, which is what
//! allows concurrent WRITE requests during uploads.

use crate::protocol::{codec, FileAttrs, MessageType, OpenFlags, StatusCode, SFTP_VERSION};
use crate::rate_limit::LatencyProbe;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use russh::client::{self, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// SSH dial timeout
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// In-flight WRITE requests per uploaded file
pub const WRITE_CONCURRENCY: usize = 64;

/// Payload size of a single WRITE request
const WRITE_CHUNK: usize = 32 * 1024;

/// Upper bound on an incoming SFTP packet; anything larger is a protocol error
const MAX_PACKET_LEN: usize = 1024 * 1024;

type PacketReader = Box<dyn AsyncRead + Send + Unpin>;
type PacketWriter = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

/// One credential the dialer can present, tried in registration order.
#[derive(Clone)]
pub enum AuthCredential {
    Password(String),
    PrivateKey(Arc<PrivateKey>),
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credential material
        match self {
            AuthCredential::Password(_) => f.write_str("AuthCredential::Password"),
            AuthCredential::PrivateKey(_) => f.write_str("AuthCredential::PrivateKey"),
        }
    }
}

/// Host key acceptance callback, captured when the interactive session was
/// established and replayed for the transfer connection.
pub type HostKeyVerifier = Arc<dyn Fn(&PublicKey) -> bool + Send + Sync>;

/// Everything required to re-dial SSH for a transfer.
#[derive(Clone)]
pub struct SshTarget {
    /// host:port
    pub address: String,
    pub user: String,
    pub auth: Vec<AuthCredential>,
    pub host_key: HostKeyVerifier,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("auth_methods", &self.auth.len())
            .finish()
    }
}

/// SSH client handler delegating host key checks to the cached verifier
struct ClientHandler {
    verify: HostKeyVerifier,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok((self.verify)(server_public_key))
    }
}

struct Pending {
    map: HashMap<u32, oneshot::Sender<Vec<u8>>>,
    closed: bool,
}

struct Inner {
    session: Mutex<Option<Handle<ClientHandler>>>,
    writer: Mutex<PacketWriter>,
    pending: Mutex<Pending>,
    next_request_id: AtomicU32,
}

/// SFTP session over its own SSH connection.
///
/// Cheap to clone; all clones share the channel and the response router.
#[derive(Clone)]
pub struct SftpSession {
    inner: Arc<Inner>,
}

impl SftpSession {
    /// Dial SSH with the cached credentials and open the SFTP subsystem.
    ///
    /// The dial is bounded by [`DIAL_TIMEOUT`]. Credentials are tried in
    /// order; the first accepted one wins.
    pub async fn connect(target: &SshTarget) -> Result<Self> {
        info!(
            "Dialing independent SSH connection to {}@{}",
            target.user, target.address
        );

        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            verify: Arc::clone(&target.host_key),
        };

        let mut session = tokio::time::timeout(
            DIAL_TIMEOUT,
            client::connect(config, target.address.as_str(), handler),
        )
        .await
        .map_err(|_| Error::Timeout(format!("SSH dial to {} timed out", target.address)))?
        .map_err(|e| Error::Connection(format!("SSH connection failed: {}", e)))?;

        let mut authenticated = false;
        for credential in &target.auth {
            let outcome = match credential {
                AuthCredential::Password(password) => {
                    session
                        .authenticate_password(target.user.as_str(), password.as_str())
                        .await
                }
                AuthCredential::PrivateKey(key) => {
                    let key = PrivateKeyWithHashAlg::new(Arc::clone(key), None);
                    session
                        .authenticate_publickey(target.user.as_str(), key)
                        .await
                }
            };
            match outcome {
                Ok(result) if result.success() => {
                    authenticated = true;
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    return Err(Error::Authentication(format!(
                        "Authentication failed: {}",
                        e
                    )))
                }
            }
        }
        if !authenticated {
            return Err(Error::Authentication(format!(
                "No accepted authentication method for {}",
                target.user
            )));
        }

        info!("SSH connection established to {}", target.address);

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| Error::Connection(format!("Failed to open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Protocol(format!("Failed to start SFTP subsystem: {}", e)))?;

        let (read_half, write_half) = tokio::io::split(channel.into_stream());
        let mut reader: PacketReader = Box::new(read_half);

        let client = Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Some(session)),
                writer: Mutex::new(Box::new(write_half)),
                pending: Mutex::new(Pending {
                    map: HashMap::new(),
                    closed: false,
                }),
                next_request_id: AtomicU32::new(1),
            }),
        };

        client.init(&mut reader).await?;

        let inner = Arc::clone(&client.inner);
        tokio::spawn(route_responses(inner, reader));

        Ok(client)
    }

    /// INIT/VERSION exchange, performed before the response router starts
    async fn init(&self, reader: &mut PacketReader) -> Result<()> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Init as u8);
        buf.put_u32(SFTP_VERSION);
        self.send_packet(&buf).await?;

        let response = read_packet(reader).await?;
        if response.first() != Some(&(MessageType::Version as u8)) || response.len() < 5 {
            return Err(Error::Protocol("Invalid INIT response".into()));
        }
        let version = u32::from_be_bytes([response[1], response[2], response[3], response[4]]);
        debug!("SFTP server version: {}", version);
        if version != SFTP_VERSION {
            warn!(
                "Server version {} differs from client version {}",
                version, SFTP_VERSION
            );
        }
        Ok(())
    }

    /// Canonicalize a path. Also serves as the cheapest available round trip
    /// for latency sampling.
    pub async fn real_path(&self, path: &str) -> Result<String> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Realpath as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);

        let response = self.rpc(&buf, request_id).await?;
        let mut names = parse_name_response(&response)?;
        if names.is_empty() {
            return Err(Error::Protocol("Empty REALPATH response".into()));
        }
        Ok(names.remove(0).0)
    }

    /// Get attributes by path (follows symlinks)
    pub async fn stat(&self, path: &str) -> Result<FileAttrs> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Stat as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);

        let response = self.rpc(&buf, request_id).await?;
        parse_attrs_response(&response)
    }

    /// Get attributes by open handle
    pub async fn fstat(&self, handle: &[u8]) -> Result<FileAttrs> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Fstat as u8);
        buf.put_u32(request_id);
        codec::put_bytes(&mut buf, handle);

        let response = self.rpc(&buf, request_id).await?;
        parse_attrs_response(&response)
    }

    /// List a directory. `.` and `..` entries are dropped.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileAttrs)>> {
        let handle = self.open_dir(path).await?;
        let mut entries = Vec::new();
        loop {
            match self.read_dir_batch(&handle).await {
                Ok(Some(batch)) => {
                    entries.extend(
                        batch
                            .into_iter()
                            .filter(|(name, _)| name != "." && name != ".."),
                    );
                }
                Ok(None) => break,
                Err(e) => {
                    self.close(&handle).await.ok();
                    return Err(e);
                }
            }
        }
        self.close(&handle).await?;
        Ok(entries)
    }

    /// Create a single directory
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        debug!("Creating directory: {}", path);
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Mkdir as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);
        buf.extend_from_slice(&FileAttrs::default().encode());

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Create a directory along with any missing parents
    pub async fn mkdir_all(&self, path: &str) -> Result<()> {
        match self.stat(path).await {
            Ok(attrs) if attrs.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(Error::Protocol(format!(
                    "{} exists and is not a directory",
                    path
                )))
            }
            Err(_) => {}
        }

        let mut prefix = if path.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(component);

            if let Err(e) = self.mkdir(&prefix).await {
                // A lost race or an existing parent both show up as failure;
                // only surface it if the directory still is not there.
                match self.stat(&prefix).await {
                    Ok(attrs) if attrs.is_dir() => {}
                    _ => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Remove a file
    pub async fn remove(&self, path: &str) -> Result<()> {
        debug!("Removing file: {}", path);
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Remove as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Remove an (empty) directory
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        debug!("Removing directory: {}", path);
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Rmdir as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Rename a file or directory
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("Renaming {} to {}", old_path, new_path);
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Rename as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, old_path);
        codec::put_string(&mut buf, new_path);

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Open an existing file for reading, returning its handle
    pub async fn open_read(&self, path: &str) -> Result<Vec<u8>> {
        self.open(path, OpenFlags::read_only()).await
    }

    /// Create (or truncate) a file for writing, returning its handle
    pub async fn create(&self, path: &str) -> Result<Vec<u8>> {
        self.open(path, OpenFlags::create_truncate()).await
    }

    /// Read up to `len` bytes at `offset`. An empty result means EOF; the
    /// server may return fewer bytes than requested.
    pub async fn read(&self, handle: &[u8], offset: u64, len: u32) -> Result<Vec<u8>> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Read as u8);
        buf.put_u32(request_id);
        codec::put_bytes(&mut buf, handle);
        buf.put_u64(offset);
        buf.put_u32(len);

        let response = self.rpc(&buf, request_id).await?;
        parse_data_response(&response)
    }

    /// Write `data` at `offset`
    pub async fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::with_capacity(data.len() + 64);
        buf.put_u8(MessageType::Write as u8);
        buf.put_u32(request_id);
        codec::put_bytes(&mut buf, handle);
        buf.put_u64(offset);
        codec::put_bytes(&mut buf, data);

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Close a file or directory handle
    pub async fn close(&self, handle: &[u8]) -> Result<()> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Close as u8);
        buf.put_u32(request_id);
        codec::put_bytes(&mut buf, handle);

        let response = self.rpc(&buf, request_id).await?;
        check_status_response(&response)
    }

    /// Stream `source` into an open file with up to `concurrency` WRITE
    /// requests in flight against sequential offsets. Returns the number of
    /// bytes submitted once every write has been acknowledged.
    ///
    /// Chunking of the source is independent of how the bytes arrived; frame
    /// boundaries on the feeding side do not constrain write sizes.
    pub async fn write_from<R>(
        &self,
        handle: &[u8],
        mut source: R,
        concurrency: usize,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut in_flight: JoinSet<Result<()>> = JoinSet::new();
        let mut offset = 0u64;
        let mut buf = vec![0u8; WRITE_CHUNK];

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            while in_flight.len() >= concurrency {
                if let Some(joined) = in_flight.join_next().await {
                    join_write_result(joined, &mut in_flight)?;
                }
            }

            let session = self.clone();
            let handle = handle.to_vec();
            let chunk = buf[..n].to_vec();
            let chunk_offset = offset;
            in_flight.spawn(async move { session.write(&handle, chunk_offset, &chunk).await });
            offset += n as u64;
        }

        while let Some(joined) = in_flight.join_next().await {
            join_write_result(joined, &mut in_flight)?;
        }

        Ok(offset)
    }

    /// A latency probe bound to this session's SSH connection
    pub fn rtt_probe(&self) -> SftpRttProbe {
        SftpRttProbe {
            session: self.clone(),
        }
    }

    /// Gracefully terminate the SSH session
    pub async fn disconnect(&self) {
        if let Some(session) = self.inner.session.lock().await.take() {
            session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .ok();
        }
    }

    // ===== Private helpers =====

    async fn open(&self, path: &str, flags: OpenFlags) -> Result<Vec<u8>> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Open as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);
        buf.put_u32(flags.0);
        buf.extend_from_slice(&FileAttrs::default().encode());

        let response = self.rpc(&buf, request_id).await?;
        parse_handle_response(&response)
    }

    async fn open_dir(&self, path: &str) -> Result<Vec<u8>> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Opendir as u8);
        buf.put_u32(request_id);
        codec::put_string(&mut buf, path);

        let response = self.rpc(&buf, request_id).await?;
        parse_handle_response(&response)
    }

    /// One READDIR batch; `None` at end of directory
    async fn read_dir_batch(&self, handle: &[u8]) -> Result<Option<Vec<(String, FileAttrs)>>> {
        let request_id = self.next_request_id();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Readdir as u8);
        buf.put_u32(request_id);
        codec::put_bytes(&mut buf, handle);

        let response = self.rpc(&buf, request_id).await?;
        match parse_name_response(&response) {
            Ok(batch) => Ok(Some(batch)),
            Err(e) if e.is_eof() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn next_request_id(&self) -> u32 {
        self.inner.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register interest in `request_id`, send the packet, await the response
    async fn rpc(&self, payload: &[u8], request_id: u32) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.closed {
                return Err(Error::Connection("SFTP channel closed".into()));
            }
            pending.map.insert(request_id, tx);
        }

        if let Err(e) = self.send_packet(payload).await {
            self.inner.pending.lock().await.map.remove(&request_id);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::Connection("SFTP channel closed".into()))
    }

    async fn send_packet(&self, payload: &[u8]) -> Result<()> {
        let mut framed = BytesMut::with_capacity(payload.len() + 4);
        framed.put_u32(payload.len() as u32);
        framed.put_slice(payload);

        let mut writer = self.inner.writer.lock().await;
        writer
            .write_all(&framed)
            .await
            .map_err(|e| Error::Connection(format!("Failed to send packet: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Connection(format!("Failed to flush packet: {}", e)))?;
        Ok(())
    }
}

/// In-band RTT sample: time a REALPATH round trip on the transfer connection.
pub struct SftpRttProbe {
    session: SftpSession,
}

#[async_trait]
impl LatencyProbe for SftpRttProbe {
    async fn measure(&self) -> Result<Duration> {
        let start = Instant::now();
        self.session.real_path(".").await?;
        Ok(start.elapsed())
    }
}

fn join_write_result(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
    in_flight: &mut JoinSet<Result<()>>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            in_flight.abort_all();
            Err(e)
        }
        Err(e) => {
            in_flight.abort_all();
            Err(Error::Protocol(format!("Write task failed: {}", e)))
        }
    }
}

/// Read one length-prefixed SFTP packet
async fn read_packet(reader: &mut PacketReader) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::Connection(format!("SFTP channel read failed: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(Error::Protocol(format!("Invalid packet length: {}", len)));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::Connection(format!("SFTP channel read failed: {}", e)))?;
    Ok(payload)
}

/// Route responses to their callers until the channel dies, then fail
/// everything still outstanding.
async fn route_responses(inner: Arc<Inner>, mut reader: PacketReader) {
    loop {
        let packet = match read_packet(&mut reader).await {
            Ok(packet) => packet,
            Err(e) => {
                debug!("SFTP response loop ended: {}", e);
                break;
            }
        };
        if packet.len() < 5 {
            warn!("Dropping runt SFTP packet ({} bytes)", packet.len());
            continue;
        }

        let request_id = u32::from_be_bytes([packet[1], packet[2], packet[3], packet[4]]);
        let waiter = inner.pending.lock().await.map.remove(&request_id);
        match waiter {
            // Send fails only if the caller gave up; nothing to do then
            Some(tx) => {
                let _ = tx.send(packet);
            }
            None => warn!("Unmatched SFTP response for request {}", request_id),
        }
    }

    let mut pending = inner.pending.lock().await;
    pending.closed = true;
    // Dropping the senders wakes every waiting caller with a channel error
    pending.map.clear();
}

// ===== Response parsing =====

fn response_type(response: &[u8]) -> Result<MessageType> {
    let first = response
        .first()
        .ok_or_else(|| Error::Protocol("Empty response".into()))?;
    MessageType::try_from(*first)
}

fn check_status_response(response: &[u8]) -> Result<()> {
    match parse_status(response)? {
        (code, _) if code == StatusCode::Ok as u32 => Ok(()),
        (code, message) => Err(Error::Status { code, message }),
    }
}

fn parse_status(response: &[u8]) -> Result<(u32, String)> {
    if response_type(response)? != MessageType::Status {
        return Err(Error::Protocol(format!(
            "Expected STATUS, got {:?}",
            response_type(response)?
        )));
    }
    let mut buf = &response[1..];
    let _request_id = buf.get_u32();
    if buf.remaining() < 4 {
        return Err(Error::Protocol("Truncated STATUS response".into()));
    }
    let code = buf.get_u32();
    let message = codec::get_string(&mut buf).unwrap_or_default();
    Ok((code, message))
}

fn parse_handle_response(response: &[u8]) -> Result<Vec<u8>> {
    match response_type(response)? {
        MessageType::Handle => {
            let mut buf = &response[1..];
            let _request_id = buf.get_u32();
            codec::get_bytes(&mut buf)
        }
        MessageType::Status => {
            let (code, message) = parse_status(response)?;
            Err(Error::Status { code, message })
        }
        other => Err(Error::Protocol(format!("Expected HANDLE, got {:?}", other))),
    }
}

/// DATA payload, or an empty vector on the EOF status
fn parse_data_response(response: &[u8]) -> Result<Vec<u8>> {
    match response_type(response)? {
        MessageType::Data => {
            let mut buf = &response[1..];
            let _request_id = buf.get_u32();
            codec::get_bytes(&mut buf)
        }
        MessageType::Status => {
            let (code, message) = parse_status(response)?;
            if code == StatusCode::Eof as u32 {
                Ok(Vec::new())
            } else {
                Err(Error::Status { code, message })
            }
        }
        other => Err(Error::Protocol(format!(
            "Expected DATA or STATUS, got {:?}",
            other
        ))),
    }
}

fn parse_attrs_response(response: &[u8]) -> Result<FileAttrs> {
    match response_type(response)? {
        MessageType::Attrs => {
            let mut buf = &response[1..];
            let _request_id = buf.get_u32();
            FileAttrs::decode(&mut buf)
        }
        MessageType::Status => {
            let (code, message) = parse_status(response)?;
            Err(Error::Status { code, message })
        }
        other => Err(Error::Protocol(format!("Expected ATTRS, got {:?}", other))),
    }
}

fn parse_name_response(response: &[u8]) -> Result<Vec<(String, FileAttrs)>> {
    match response_type(response)? {
        MessageType::Name => {
            let mut buf = &response[1..];
            let _request_id = buf.get_u32();
            if buf.remaining() < 4 {
                return Err(Error::Protocol("Truncated NAME response".into()));
            }
            let count = buf.get_u32() as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let filename = codec::get_string(&mut buf)?;
                let _longname = codec::get_string(&mut buf)?;
                let attrs = FileAttrs::decode(&mut buf)?;
                entries.push((filename, attrs));
            }
            Ok(entries)
        }
        MessageType::Status => {
            let (code, message) = parse_status(response)?;
            Err(Error::Status { code, message })
        }
        other => Err(Error::Protocol(format!("Expected NAME, got {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_packet(request_id: u32, code: u32, message: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Status as u8);
        buf.put_u32(request_id);
        buf.put_u32(code);
        codec::put_string(&mut buf, message);
        codec::put_string(&mut buf, "en");
        buf.to_vec()
    }

    #[test]
    fn test_check_status_ok() {
        let packet = status_packet(7, StatusCode::Ok as u32, "Success");
        assert!(check_status_response(&packet).is_ok());
    }

    #[test]
    fn test_check_status_failure_keeps_server_message() {
        let packet = status_packet(7, StatusCode::PermissionDenied as u32, "Permission denied");
        let err = check_status_response(&packet).unwrap_err();
        assert_eq!(err.to_string(), "Permission denied");
    }

    #[test]
    fn test_parse_handle_response() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Handle as u8);
        buf.put_u32(3);
        codec::put_bytes(&mut buf, b"h0");
        assert_eq!(parse_handle_response(&buf).unwrap(), b"h0".to_vec());
    }

    #[test]
    fn test_parse_data_eof_is_empty() {
        let packet = status_packet(9, StatusCode::Eof as u32, "End of file");
        assert!(parse_data_response(&packet).unwrap().is_empty());
    }

    #[test]
    fn test_parse_data_response() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Data as u8);
        buf.put_u32(4);
        codec::put_bytes(&mut buf, &[1, 2, 3, 4, 5]);
        assert_eq!(parse_data_response(&buf).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parse_name_response() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Name as u8);
        buf.put_u32(11);
        buf.put_u32(2);
        for name in ["notes.txt", "src"] {
            codec::put_string(&mut buf, name);
            codec::put_string(&mut buf, &format!("-rw-r--r-- {}", name));
            buf.extend_from_slice(
                &FileAttrs {
                    size: Some(12),
                    ..Default::default()
                }
                .encode(),
            );
        }

        let entries = parse_name_response(&buf).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "notes.txt");
        assert_eq!(entries[1].0, "src");
        assert_eq!(entries[0].1.size, Some(12));
    }

    #[test]
    fn test_wrong_response_type_is_protocol_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Data as u8);
        buf.put_u32(2);
        codec::put_bytes(&mut buf, b"x");
        assert!(matches!(
            parse_attrs_response(&buf),
            Err(Error::Protocol(_))
        ));
    }
}
