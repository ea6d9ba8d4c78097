use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use stackup_types::{RecordBody, RecordSource, Signal, StackError, StackResult, TelemetryRecord};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::forwarder::ForwarderStats;
use crate::supervisor::CancellationToken;

/// Frame payload: one signal byte followed by the record body.
pub fn decode_frame(payload: &[u8]) -> StackResult<TelemetryRecord> {
    let (&code, body) = payload
        .split_first()
        .ok_or_else(|| StackError::Telemetry("Empty frame".into()))?;
    let signal = Signal::from_code(code)
        .ok_or_else(|| StackError::Telemetry(format!("Unknown signal code {}", code)))?;

    Ok(TelemetryRecord::new(
        signal,
        RecordSource::Framed,
        RecordBody::from_bytes(body),
    ))
}

pub fn encode_frame(signal: Signal, body: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(body.len() + 1);
    payload.put_u8(signal.code());
    payload.put_slice(body);
    payload.freeze()
}

pub(crate) fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

pub(crate) async fn serve(
    listener: TcpListener,
    records: mpsc::Sender<TelemetryRecord>,
    stats: Arc<ForwarderStats>,
    max_frame_length: usize,
    mut cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Framed telemetry connection from {}", peer);
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        records.clone(),
                        stats.clone(),
                        max_frame_length,
                        cancel.clone(),
                    ));
                }
                Err(e) => warn!("Framed listener accept failed: {}", e),
            },
            _ = cancel.cancelled() => break,
        }
    }
    info!("Framed telemetry endpoint stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    records: mpsc::Sender<TelemetryRecord>,
    stats: Arc<ForwarderStats>,
    max_frame_length: usize,
    mut cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(stream, codec(max_frame_length));

    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = cancel.cancelled() => break,
        };

        match frame {
            Some(Ok(payload)) => match decode_frame(&payload) {
                Ok(record) => {
                    stats.record_received();
                    if records.send(record).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    stats.record_rejected();
                    warn!("Dropping frame from {}: {}", peer, e);
                }
            },
            Some(Err(e)) => {
                warn!("Framed connection {} closed on error: {}", peer, e);
                break;
            }
            None => break,
        }
    }

    debug!("Framed telemetry connection from {} closed", peer);
}
