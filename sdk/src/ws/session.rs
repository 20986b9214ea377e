//! Session driver.
//!
//! One driver task runs per `connect` call. It owns the transport, performs
//! the STOMP handshake, decodes and dispatches inbound frames, writes queued
//! outbound frames, keeps heartbeats, and reconnects after a drop.

use std::sync::Arc;

use futures_util::{future, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::client::{ConnectionState, SessionEvent, SocketInner};
use super::error::WsError;
use super::frame::{Command, Frame, FrameDecoder, Heartbeat, Inbound, HEARTBEAT};
use super::transport::{redact_token, TransportLink};

/// State handed from a completed handshake to the session loop.
struct Handshake {
    link: TransportLink,
    decoder: FrameDecoder,
    heartbeat: Heartbeat,
    server_session: Option<String>,
}

/// Why a connected session ended.
enum SessionEnd {
    /// `disconnect` was called.
    Shutdown,
    /// The connection was lost.
    Dropped(WsError),
    /// Another `connect` replaced this driver while it was handshaking.
    Superseded,
}

/// Runs the connect/reconnect loop for one epoch.
pub(super) async fn drive(
    inner: Arc<SocketInner>,
    epoch: u64,
    credential: Option<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut failures: u32 = 0;

    loop {
        inner.metrics.record_connect_attempt();
        debug!(
            "Opening session to {} (epoch {})",
            redact_token(&inner.config.url),
            epoch
        );

        let attempt = tokio::select! {
            _ = &mut shutdown => break,
            attempt = handshake(&inner, credential.as_deref()) => attempt,
        };

        match attempt {
            Ok(handshake) => {
                failures = 0;
                match run_session(&inner, epoch, credential.as_deref(), handshake, &mut shutdown)
                    .await
                {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Superseded => return,
                    SessionEnd::Dropped(err) => {
                        warn!("Session lost: {}", err);
                        inner.publish_if_current(epoch, SessionEvent::Error(err));
                    }
                }
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                inner.metrics.record_connect_failure();
                warn!("Connection attempt {} failed: {}", failures, err);
                inner.publish_if_current(epoch, SessionEvent::Error(err));

                if let Some(max) = inner.config.max_reconnect_attempts {
                    if failures >= max {
                        error!("Giving up after {} failed connection attempts", failures);
                        inner.give_up(epoch);
                        return;
                    }
                }
            }
        }

        if !inner.set_state_if_current(epoch, ConnectionState::Reconnecting) {
            return;
        }
        debug!("Reconnecting in {:?}", inner.config.reconnect_delay);

        tokio::select! {
            _ = &mut shutdown => break,
            () = time::sleep(inner.config.reconnect_delay) => {}
        }
    }

    debug!("Session driver for epoch {} stopped", epoch);
}

/// Opens the transport and completes the STOMP handshake within the
/// configured timeout.
async fn handshake(inner: &SocketInner, credential: Option<&str>) -> Result<Handshake, WsError> {
    time::timeout(inner.config.connect_timeout, open_session(inner, credential))
        .await
        .map_err(|_| WsError::HandshakeTimeout)?
}

async fn open_session(inner: &SocketInner, credential: Option<&str>) -> Result<Handshake, WsError> {
    let url = inner.config.connection_url(credential);
    let mut link = inner.connector.open(url).await?;

    let connect = Frame::connect(credential, &inner.config.heartbeat_header());
    link.sink.send(connect.encode()).await?;
    inner.metrics.record_frame_sent();

    let mut decoder = FrameDecoder::new();
    loop {
        while let Some(inbound) = decoder.next_frame()? {
            let Inbound::Frame(frame) = inbound else {
                inner.metrics.record_heartbeat_received();
                continue;
            };
            inner.metrics.record_frame_received();

            match frame.command {
                Command::Connected => {
                    let heartbeat = Heartbeat::negotiate(
                        inner.config.heartbeat_outgoing,
                        inner.config.heartbeat_incoming,
                        frame.header("heart-beat"),
                    );
                    return Ok(Handshake {
                        link,
                        decoder,
                        heartbeat,
                        server_session: frame.header("session").map(str::to_string),
                    });
                }
                Command::Error => return Err(server_error(&frame)),
                other => debug!("Ignoring {} before CONNECTED", other),
            }
        }

        match link.source.next().await {
            Some(Ok(text)) => decoder.push(&text),
            Some(Err(e)) => return Err(e),
            None => return Err(WsError::Closed),
        }
    }
}

/// Runs one connected session until it drops or is shut down.
async fn run_session(
    inner: &Arc<SocketInner>,
    epoch: u64,
    credential: Option<&str>,
    handshake: Handshake,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let Handshake {
        mut link,
        mut decoder,
        heartbeat,
        server_session,
    } = handshake;

    let (outbound_tx, mut outbound) = mpsc::unbounded_channel::<Frame>();
    let Some(generation) = inner.begin_session(epoch, outbound_tx, server_session) else {
        let _ = link.sink.close().await;
        return SessionEnd::Superseded;
    };
    info!(
        "Session {} established (outgoing heartbeat {:?}, incoming {:?})",
        generation, heartbeat.outgoing, heartbeat.incoming
    );

    inner.subscribe_global_topics(credential.is_some());
    inner.publish(&SessionEvent::Connected { generation });

    // Frames that arrived together with CONNECTED.
    if let Err(err) = process_inbound(inner, &mut decoder) {
        inner.end_session(epoch, generation);
        return SessionEnd::Dropped(err);
    }

    let mut outgoing = heartbeat.outgoing.map(|period| {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let silence_limit = heartbeat.incoming.map(|period| period * 2);
    let mut last_inbound = Instant::now();

    let end = loop {
        let deadline = silence_limit.map(|limit| last_inbound + limit);

        tokio::select! {
            _ = &mut *shutdown => {
                close_link(inner, &mut link).await;
                break SessionEnd::Shutdown;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = link.sink.send(frame.encode()).await {
                        break SessionEnd::Dropped(e);
                    }
                    inner.metrics.record_frame_sent();
                }
                None => {
                    close_link(inner, &mut link).await;
                    break SessionEnd::Shutdown;
                }
            },
            chunk = link.source.next() => match chunk {
                Some(Ok(text)) => {
                    last_inbound = Instant::now();
                    decoder.push(&text);
                    if let Err(err) = process_inbound(inner, &mut decoder) {
                        break SessionEnd::Dropped(err);
                    }
                }
                Some(Err(e)) => break SessionEnd::Dropped(e),
                None => break SessionEnd::Dropped(WsError::Closed),
            },
            () = next_tick(outgoing.as_mut()) => {
                if let Err(e) = link.sink.send(HEARTBEAT.to_string()).await {
                    break SessionEnd::Dropped(e);
                }
                inner.metrics.record_heartbeat_sent();
            }
            () = silence(deadline) => {
                inner.metrics.record_heartbeat_timeout();
                warn!("No data from server for {:?}, dropping connection", silence_limit);
                break SessionEnd::Dropped(WsError::Protocol("heartbeat timeout".to_string()));
            }
        }
    };

    inner.end_session(epoch, generation);
    end
}

/// Decodes every complete unit buffered in `decoder` and dispatches it.
///
/// Malformed frames are logged and skipped. A server ERROR frame ends the
/// session.
fn process_inbound(inner: &SocketInner, decoder: &mut FrameDecoder) -> Result<(), WsError> {
    loop {
        let inbound = match decoder.next_frame() {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return Ok(()),
            Err(e) => {
                error!("Discarding undecodable input: {}", e);
                inner.metrics.record_decode_failure();
                continue;
            }
        };

        let frame = match inbound {
            Inbound::Heartbeat => {
                inner.metrics.record_heartbeat_received();
                continue;
            }
            Inbound::Frame(frame) => frame,
        };
        inner.metrics.record_frame_received();

        match frame.command {
            Command::Message => {
                inner.router.route_message(&frame);
            }
            Command::Error => {
                let err = server_error(&frame);
                error!("Server error: {}", err);
                return Err(err);
            }
            Command::Receipt => debug!("Receipt {:?}", frame.header("receipt-id")),
            other => debug!("Ignoring unexpected {} frame", other),
        }
    }
}

async fn close_link(inner: &SocketInner, link: &mut TransportLink) {
    if link.sink.send(Frame::disconnect().encode()).await.is_ok() {
        inner.metrics.record_frame_sent();
    }
    let _ = link.sink.close().await;
    debug!("Transport closed");
}

fn server_error(frame: &Frame) -> WsError {
    WsError::Server {
        message: frame.header("message").unwrap_or("unknown").to_string(),
        details: frame.body.trim_end().to_string(),
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn silence(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
