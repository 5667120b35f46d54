//! SFTP relay session over a WebSocket channel.
//!
//! One connection runs one state machine: validate the session id, upgrade,
//! dial an independent SSH connection with the cached credentials, open the
//! SFTP subsystem, then serve the request/response loop. Dial and init
//! failures are reported once and end the session; per-action failures are
//! reported and leave the session ready for the next request.
//!
//! Every outbound frame (responses, stream chunks, control pings) goes
//! through one mutex-guarded sink, so outbound messages are totally ordered
//! per connection.

use crate::message::{FileEntry, Request, Response};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use osprey_sftp::{AdaptiveRateLimiter, Error as SftpError, SftpSession, SshTarget};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest accepted channel message
const READ_LIMIT: usize = 256 * 1024;
/// Idle read deadline, refreshed by pongs
const READ_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// Control-ping cadence
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Control-ping write deadline
const PING_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Download chunk size: one binary frame per chunk
const DOWNLOAD_CHUNK: usize = 256 * 1024;
/// Buffer between the channel reader and the SFTP writer during uploads
const PIPE_CAPACITY: usize = 256 * 1024;

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;
type Receiver = SplitStream<WebSocket>;

#[derive(Deserialize)]
pub struct RelayParams {
    #[serde(default)]
    session: String,
}

/// Accept when there is no `Origin` header, or when its value textually
/// contains the request host.
fn origin_allowed(origin: Option<&str>, host: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(origin) => host.map(|host| origin.contains(host)).unwrap_or(false),
    }
}

/// `GET /sftp?session=<id>`: upgrade to the relay channel
pub async fn sftp_ws(
    State(state): State<AppState>,
    Query(params): Query<RelayParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if !origin_allowed(origin, host) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    if params.session.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing session parameter").into_response();
    }
    let Some(target) = state.sessions.get(&params.session) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let session_id = params.session;
    ws.max_message_size(READ_LIMIT)
        .max_frame_size(READ_LIMIT)
        .on_upgrade(move |socket| run_session(socket, session_id, target))
}

async fn run_session(socket: WebSocket, session_id: String, target: Arc<SshTarget>) {
    let (sink, mut stream) = socket.split();
    let sender: Sender = Arc::new(Mutex::new(sink));

    let heartbeat_stop = CancellationToken::new();
    let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&sender), heartbeat_stop.clone()));

    info!(
        "SFTP relay: dialing {}@{} (session {})",
        target.user, target.address, session_id
    );

    let sftp = match SftpSession::connect(&target).await {
        Ok(sftp) => sftp,
        Err(e) => {
            warn!("SFTP relay: independent SSH dial failed: {}", e);
            let message = match &e {
                SftpError::Protocol(_) => format!("SFTP init failed: {}", e),
                _ => format!("SSH connect failed: {}", e),
            };
            send_response(&sender, &Response::error(message)).await.ok();
            heartbeat_stop.cancel();
            heartbeat.await.ok();
            return;
        }
    };

    send_response(&sender, &Response::success("connected"))
        .await
        .ok();
    info!("SFTP relay connected (session {})", session_id);

    let mut deadline = Instant::now() + READ_TIMEOUT;
    loop {
        let msg = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!("Read deadline expired (session {})", session_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Channel read failed: {}", e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Pong(_) => deadline = Instant::now() + READ_TIMEOUT,
            Message::Close(_) => break,
            // Binary frames mean nothing outside an upload
            Message::Binary(_) | Message::Ping(_) => {}
            Message::Text(text) => {
                let request: Request = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        send_response(&sender, &Response::error(format!("invalid JSON: {}", e)))
                            .await
                            .ok();
                        continue;
                    }
                };
                dispatch(&sender, &mut stream, &mut deadline, &sftp, request).await;
            }
        }
    }

    heartbeat_stop.cancel();
    heartbeat.await.ok();
    sftp.disconnect().await;
    info!("SFTP relay disconnected (session {})", session_id);
}

async fn heartbeat_loop(sender: Sender, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = timeout(PING_WRITE_TIMEOUT, async {
                    sender.lock().await.send(Message::Ping(Vec::new())).await
                })
                .await;
                // The next channel read observes the dead connection
                if !matches!(outcome, Ok(Ok(()))) {
                    return;
                }
            }
            _ = stop.cancelled() => return,
        }
    }
}

async fn dispatch(
    sender: &Sender,
    stream: &mut Receiver,
    deadline: &mut Instant,
    sftp: &SftpSession,
    request: Request,
) {
    match request.action.as_str() {
        "ping" => {
            send_response(sender, &Response::pong()).await.ok();
        }
        "list" => handle_list(sender, sftp, &request.path).await,
        "mkdir" => handle_mkdir(sender, sftp, &request.path).await,
        "delete" => handle_delete(sender, sftp, &request.path).await,
        "rename" => handle_rename(sender, sftp, &request.old_path, &request.new_path).await,
        "download" => handle_download(sender, sftp, &request.path).await,
        "upload" => {
            handle_upload(sender, stream, deadline, sftp, &request.path, request.size).await
        }
        other => {
            send_response(sender, &Response::error(format!("unknown action: {}", other)))
                .await
                .ok();
        }
    }
}

async fn handle_list(sender: &Sender, sftp: &SftpSession, path: &str) {
    let path = if path.is_empty() { "." } else { path };
    match sftp.read_dir(path).await {
        Ok(entries) => {
            let files = entries
                .into_iter()
                .map(|(name, attrs)| FileEntry::from_attrs(name, &attrs))
                .collect();
            send_response(sender, &Response::list(files)).await.ok();
        }
        Err(e) => {
            send_response(sender, &Response::error(e.to_string()))
                .await
                .ok();
        }
    }
}

async fn handle_mkdir(sender: &Sender, sftp: &SftpSession, path: &str) {
    let response = match sftp.mkdir_all(path).await {
        Ok(()) => Response::success("ok"),
        Err(e) => Response::error(e.to_string()),
    };
    send_response(sender, &response).await.ok();
}

async fn handle_delete(sender: &Sender, sftp: &SftpSession, path: &str) {
    let attrs = match sftp.stat(path).await {
        Ok(attrs) => attrs,
        Err(e) => {
            send_response(sender, &Response::error(e.to_string()))
                .await
                .ok();
            return;
        }
    };

    let result = if attrs.is_dir() {
        remove_dir_recursive(sftp, path).await
    } else {
        sftp.remove(path).await
    };

    let response = match result {
        Ok(()) => Response::success("ok"),
        Err(e) => Response::error(e.to_string()),
    };
    send_response(sender, &response).await.ok();
}

/// Depth-first post-order removal. The first failure aborts the walk; what
/// was already deleted stays deleted.
fn remove_dir_recursive<'a>(
    sftp: &'a SftpSession,
    path: &'a str,
) -> Pin<Box<dyn Future<Output = osprey_sftp::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let entries = sftp.read_dir(path).await?;
        for (name, attrs) in entries {
            let full_path = format!("{}/{}", path, name);
            if attrs.is_dir() {
                remove_dir_recursive(sftp, &full_path).await?;
            } else {
                sftp.remove(&full_path).await?;
            }
        }
        sftp.rmdir(path).await
    })
}

async fn handle_rename(sender: &Sender, sftp: &SftpSession, old_path: &str, new_path: &str) {
    let response = match sftp.rename(old_path, new_path).await {
        Ok(()) => Response::success("ok"),
        Err(e) => Response::error(e.to_string()),
    };
    send_response(sender, &response).await.ok();
}

async fn handle_download(sender: &Sender, sftp: &SftpSession, path: &str) {
    let handle = match sftp.open_read(path).await {
        Ok(handle) => handle,
        Err(e) => {
            send_response(sender, &Response::error(e.to_string()))
                .await
                .ok();
            return;
        }
    };

    let attrs = match sftp.fstat(&handle).await {
        Ok(attrs) => attrs,
        Err(e) => {
            sftp.close(&handle).await.ok();
            send_response(sender, &Response::error(e.to_string()))
                .await
                .ok();
            return;
        }
    };

    let total = attrs.size.unwrap_or(0) as i64;
    if send_response(sender, &Response::download_start(total))
        .await
        .is_err()
    {
        sftp.close(&handle).await.ok();
        return;
    }

    let mut offset = 0u64;
    let mut finished = false;
    'stream: loop {
        // Assemble a full chunk; servers are free to short-read
        let mut chunk: Vec<u8> = Vec::with_capacity(DOWNLOAD_CHUNK);
        let mut eof = false;
        while chunk.len() < DOWNLOAD_CHUNK {
            let want = (DOWNLOAD_CHUNK - chunk.len()) as u32;
            match sftp.read(&handle, offset, want).await {
                Ok(data) if data.is_empty() => {
                    eof = true;
                    break;
                }
                Ok(data) => {
                    offset += data.len() as u64;
                    chunk.extend_from_slice(&data);
                }
                // Mid-stream read errors terminate the stream without a
                // payload; the missing download_end is the only signal.
                Err(e) => {
                    debug!("Download read failed at offset {}: {}", offset, e);
                    break 'stream;
                }
            }
        }

        if !chunk.is_empty() && send_binary(sender, chunk).await.is_err() {
            break;
        }
        if eof {
            finished = true;
            break;
        }
    }

    sftp.close(&handle).await.ok();
    if finished {
        send_response(sender, &Response::download_end()).await.ok();
    }
}

async fn handle_upload(
    sender: &Sender,
    stream: &mut Receiver,
    deadline: &mut Instant,
    sftp: &SftpSession,
    path: &str,
    expected_size: i64,
) {
    let handle = match sftp.create(path).await {
        Ok(handle) => handle,
        Err(e) => {
            send_response(sender, &Response::error(e.to_string()))
                .await
                .ok();
            return;
        }
    };

    if send_response(sender, &Response::success("ready"))
        .await
        .is_err()
    {
        sftp.close(&handle).await.ok();
        return;
    }

    // Frame boundaries end at this pipe: the channel side writes whatever
    // arrives, the SFTP side re-chunks for concurrent offset writes.
    let (pipe_reader, pipe_writer) = tokio::io::duplex(PIPE_CAPACITY);
    let limiter = AdaptiveRateLimiter::new(Arc::new(sftp.rtt_probe()));
    let mut throttled = limiter.writer(pipe_writer);

    let drain_sftp = sftp.clone();
    let drain_handle = handle.clone();
    let drain = tokio::spawn(async move {
        let result = drain_sftp
            .write_from(
                &drain_handle,
                pipe_reader,
                osprey_sftp::client::WRITE_CONCURRENCY,
            )
            .await;
        drain_sftp.close(&drain_handle).await.ok();
        result
    });

    let mut channel_err: Option<String> = None;
    loop {
        let msg = match timeout_at(*deadline, stream.next()).await {
            Err(_) => {
                channel_err = Some("read deadline expired".into());
                break;
            }
            Ok(None) => {
                channel_err = Some("channel closed".into());
                break;
            }
            Ok(Some(Err(e))) => {
                channel_err = Some(e.to_string());
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Binary(data) => {
                if let Err(e) = throttled.write_all(&data).await {
                    channel_err = Some(e.to_string());
                    break;
                }
            }
            Message::Text(text) => {
                let action = serde_json::from_str::<Request>(&text)
                    .map(|request| request.action)
                    .unwrap_or_default();
                match action.as_str() {
                    "upload_done" => break,
                    "ping" => {
                        send_response(sender, &Response::pong()).await.ok();
                    }
                    _ => {
                        channel_err = Some("unexpected message during upload".into());
                        break;
                    }
                }
            }
            Message::Pong(_) => *deadline = Instant::now() + READ_TIMEOUT,
            Message::Ping(_) => {}
            Message::Close(_) => {
                channel_err = Some("channel closed".into());
                break;
            }
        }
    }

    limiter.shutdown();
    // EOF to the drain task; buffered bytes still flush through
    drop(throttled.into_inner());

    let written = match drain.await {
        Ok(Ok(written)) => written,
        Ok(Err(e)) => {
            upload_failed(sender, sftp, path, &e.to_string()).await;
            return;
        }
        Err(e) => {
            upload_failed(sender, sftp, path, &format!("upload task failed: {}", e)).await;
            return;
        }
    };

    if let Some(reason) = channel_err {
        upload_failed(sender, sftp, path, &reason).await;
        return;
    }

    if expected_size > 0 && written as i64 != expected_size {
        warn!(
            "Upload size mismatch for {}: expected {}, wrote {}",
            path, expected_size, written
        );
    }

    send_response(sender, &Response::success("ok")).await.ok();
}

/// One error response, then the partial file is removed
async fn upload_failed(sender: &Sender, sftp: &SftpSession, path: &str, reason: &str) {
    send_response(sender, &Response::error(format!("upload failed: {}", reason)))
        .await
        .ok();
    sftp.remove(path).await.ok();
}

async fn send_response(sender: &Sender, response: &Response) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(response) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode response: {}", e);
            return Ok(());
        }
    };
    sender.lock().await.send(Message::Text(payload)).await
}

async fn send_binary(sender: &Sender, data: Vec<u8>) -> Result<(), axum::Error> {
    sender.lock().await.send(Message::Binary(data)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_absent_is_allowed() {
        assert!(origin_allowed(None, Some("relay.example.com")));
        assert!(origin_allowed(None, None));
    }

    #[test]
    fn test_origin_must_contain_host() {
        assert!(origin_allowed(
            Some("https://relay.example.com"),
            Some("relay.example.com")
        ));
        assert!(origin_allowed(
            Some("https://relay.example.com:8182"),
            Some("relay.example.com:8182")
        ));
        assert!(!origin_allowed(
            Some("https://evil.example.net"),
            Some("relay.example.com")
        ));
    }

    #[test]
    fn test_origin_with_unknown_host_is_rejected() {
        assert!(!origin_allowed(Some("https://relay.example.com"), None));
    }
}
