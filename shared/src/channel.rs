//! Typed packet stream on top of an accepted TCP connection
//!
//! A started channel owns two tasks: a reader that decodes frames into an
//! inbound queue, and a writer that drains an outbound queue in call order.
//! The owner never blocks on the socket: sends are queued and receives are
//! polled. The first fault seen by either task is kept and the channel stops
//! reporting itself as running. The outbound queue is bounded: a peer that
//! stops reading fills it, and the next send faults the channel instead of
//! buffering without limit.

use crate::codec::{read_frame, write_frame, ChannelError};
use crate::packet::Packet;
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long `stop` waits for queued packets to reach the socket
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound packets allowed to wait for the socket, about four seconds of
/// snapshots at 60 Hz
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

pub struct PacketChannel {
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    max_packet_size: usize,
    outbound_capacity: usize,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<Arc<ChannelError>>>>,
    outbound: Option<mpsc::Sender<Packet>>,
    inbound: Option<mpsc::UnboundedReceiver<Packet>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl PacketChannel {
    pub fn new(stream: TcpStream, max_packet_size: usize) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            peer_addr,
            max_packet_size,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            running: Arc::new(AtomicBool::new(false)),
            fault: Arc::new(Mutex::new(None)),
            outbound: None,
            inbound: None,
            reader: None,
            writer: None,
        }
    }

    /// Overrides the outbound queue bound. Only effective before `start`.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Splits the connection and spawns the reader and writer tasks.
    /// Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        let (mut read_half, mut write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Packet>(self.outbound_capacity);
        let max_packet_size = self.max_packet_size;

        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let fault = Arc::clone(&self.fault);
        self.reader = Some(tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half, max_packet_size).await {
                    Ok(Some(packet)) => {
                        if inbound_tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        record_fault(&fault, ChannelError::Closed);
                        break;
                    }
                    Err(e) => {
                        record_fault(&fault, e);
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));

        let running = Arc::clone(&self.running);
        let fault = Arc::clone(&self.fault);
        self.writer = Some(tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &packet, max_packet_size).await {
                    record_fault(&fault, e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        }));

        self.outbound = Some(outbound_tx);
        self.inbound = Some(inbound_rx);
    }

    /// Closes the outbound queue, lets the writer flush, then tears down the
    /// reader. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.outbound.take();

        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                warn!("Writer for {:?} did not drain in time", self.peer_addr);
                abort.abort();
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        self.inbound.take();
        self.stream.take();
    }

    /// Queues a packet for the writer. A full queue faults the channel.
    pub fn send_packet(&self, packet: Packet) -> Result<(), ChannelError> {
        let outbound = self.outbound.as_ref().ok_or(ChannelError::Stopped)?;
        match outbound.try_send(packet) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue for {:?} is full; faulting channel",
                    self.peer_addr
                );
                record_fault(
                    &self.fault,
                    ChannelError::Backlogged {
                        capacity: self.outbound_capacity,
                    },
                );
                self.running.store(false, Ordering::SeqCst);
                Err(ChannelError::Backlogged {
                    capacity: self.outbound_capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChannelError::Stopped),
        }
    }

    /// Next already-received packet, if any. Never waits.
    pub fn poll_packet(&mut self) -> Option<Packet> {
        self.inbound.as_mut()?.try_recv().ok()
    }

    /// Waits for the next packet; `None` once the reader is gone and the
    /// queue is empty.
    pub async fn recv_packet(&mut self) -> Option<Packet> {
        self.inbound.as_mut()?.recv().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// First transport fault observed by the reader or writer
    pub fn recv_exception(&self) -> Option<Arc<ChannelError>> {
        self.fault.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

impl Drop for PacketChannel {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn record_fault(fault: &Mutex<Option<Arc<ChannelError>>>, error: ChannelError) {
    debug!("Packet channel fault: {}", error);
    if let Ok(mut slot) = fault.lock() {
        if slot.is_none() {
            *slot = Some(Arc::new(error));
        }
    }
}
