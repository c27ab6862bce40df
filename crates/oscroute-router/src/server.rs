//! OSC server
//!
//! Binds a UDP socket and runs a receive loop on the tokio runtime. Each
//! datagram is decoded, bundles are flattened, and every message is matched
//! against the [`Dispatcher`]. Matched messages are queued for the worker
//! pool; when the queue is full the newest message is dropped and counted.

use oscroute_core::{decode_packet, DecodeError, Message, Packet};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::delivery::{DeliveryContext, ErrorObserver, Job, WorkerPool};
use crate::dispatch::{Dispatcher, Handler, RegistrationId};
use crate::error::{DeliveryError, Result, RouterError};
use crate::stats::{ServerStats, StatsSnapshot};

/// First delay after repeated read errors; doubles per further error
const RECEIVE_BACKOFF_STEP: Duration = Duration::from_millis(1);

/// Longest pause between reads while errors persist
const MAX_RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Stopped,
}

/// Builder for [`Server`]
pub struct ServerBuilder {
    config: ServerConfig,
    dispatcher: Option<Dispatcher>,
    observer: Option<ErrorObserver>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: None,
            observer: None,
        }
    }

    /// Use an existing dispatch table instead of an empty one
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Receive decode, handler and socket errors as they happen
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Bind the socket and start receiving
    pub async fn listen(self) -> Result<Server> {
        Server::start(
            self.config,
            self.dispatcher.unwrap_or_default(),
            self.observer,
        )
        .await
    }
}

/// A running OSC server.
///
/// Dropping the server stops the receive loop and lets the workers finish the
/// queued messages in the background; [`Server::shutdown`] does the same but
/// waits for them up to the configured grace period.
pub struct Server {
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    stats: Arc<ServerStats>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: watch::Sender<bool>,
    intake: Option<JoinHandle<Result<()>>>,
    workers: Option<WorkerPool>,
    drain_grace: Duration,
}

impl Server {
    /// Bind `config.host:config.port` and dispatch through `dispatcher`
    pub async fn listen(config: ServerConfig, dispatcher: Dispatcher) -> Result<Self> {
        Self::start(config, dispatcher, None).await
    }

    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    async fn start(
        config: ServerConfig,
        dispatcher: Dispatcher,
        observer: Option<ErrorObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let socket = bind_socket(&config).await?;
        let local_addr = socket.local_addr()?;

        let stats = Arc::new(ServerStats::default());
        let ctx = Arc::new(DeliveryContext::new(Arc::clone(&stats), observer));
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity);
        let workers = WorkerPool::spawn(config.workers, jobs_rx, Arc::clone(&ctx))?;

        let state = Arc::new(RwLock::new(ServerState::Listening));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let intake = Intake {
            dispatcher: dispatcher.clone(),
            ctx,
            jobs: jobs_tx,
            max_packet_size: config.max_packet_size,
        };
        let handle = tokio::spawn(receive_loop(
            socket,
            intake,
            shutdown_rx,
            Arc::clone(&state),
        ));

        info!(
            "OSC server listening on {} ({} workers, queue {})",
            local_addr,
            workers.size(),
            config.queue_capacity
        );

        Ok(Self {
            local_addr,
            dispatcher,
            stats,
            state,
            shutdown_tx,
            intake: Some(handle),
            workers: Some(workers),
            drain_grace: config.drain_grace(),
        })
    }

    /// Actual bound address, with the real port when 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register a handler; see [`Dispatcher::map`]
    pub fn map<H: Handler>(&self, pattern: &str, handler: H) -> Result<RegistrationId> {
        self.dispatcher.map(pattern, handler)
    }

    /// Remove a handler; see [`Dispatcher::unmap`]
    pub fn unmap(&self, id: RegistrationId) -> bool {
        self.dispatcher.unmap(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Stop receiving, then wait up to the drain grace for queued messages.
    ///
    /// Handlers still running after the grace are left to finish on their
    /// own. Returns the transport error that stopped the receive loop, if any.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down OSC server on {}", self.local_addr);
        let _ = self.shutdown_tx.send(true);

        let outcome = match self.intake.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(RouterError::Other(format!("receive task failed: {}", e))),
            },
            None => Ok(()),
        };
        *self.state.write() = ServerState::Stopped;

        if let Some(workers) = self.workers.take() {
            if !workers.drain(self.drain_grace).await {
                warn!(
                    "Handlers still running after {:?}, abandoning them",
                    self.drain_grace
                );
            }
        }

        info!("OSC server on {} stopped", self.local_addr);
        outcome
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        *self.state.write() = ServerState::Stopped;
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("registrations", &self.dispatcher.len())
            .finish()
    }
}

/// Start a server on `host:port` with default settings and an empty
/// dispatch table
pub async fn listen(host: &str, port: u16) -> Result<Server> {
    Server::listen(ServerConfig::new(host, port), Dispatcher::new()).await
}

async fn bind_socket(config: &ServerConfig) -> Result<UdpSocket> {
    let bind_addr = config.bind_addr();
    let bind_err = |source: io::Error| RouterError::Bind {
        addr: bind_addr.clone(),
        source,
    };

    let addr = tokio::net::lookup_host(&bind_addr)
        .await
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| {
            bind_err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })?;

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_err)?;
    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!("Could not set receive buffer to {} bytes: {}", size, e);
        }
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

/// Receive side of the pipeline, owned by the receive task
struct Intake {
    dispatcher: Dispatcher,
    ctx: Arc<DeliveryContext>,
    jobs: mpsc::Sender<Job>,
    max_packet_size: usize,
}

impl Intake {
    fn stats(&self) -> &ServerStats {
        &self.ctx.stats
    }

    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        ServerStats::incr(&self.stats().packets_received);

        // The read buffer is one byte larger than the limit, so a full
        // buffer means the datagram was truncated
        if data.len() > self.max_packet_size {
            self.reject(
                peer,
                DecodeError::Oversized {
                    size: data.len(),
                    max: self.max_packet_size,
                },
            );
            return;
        }

        let packet = match decode_packet(data) {
            Ok(packet) => packet,
            Err(error) => {
                self.reject(peer, error);
                return;
            }
        };

        if let Packet::Bundle(bundle) = &packet {
            if !bundle.timetag.is_immediate() {
                debug!(
                    "Bundle from {} scheduled for {:?}, dispatching now",
                    peer, bundle.timetag
                );
            }
        }

        for message in packet.into_messages() {
            ServerStats::incr(&self.stats().messages_received);
            self.enqueue(message);
        }
    }

    fn reject(&self, peer: SocketAddr, error: DecodeError) {
        ServerStats::incr(&self.stats().decode_errors);
        self.ctx.report(DeliveryError::Decode { peer, error });
    }

    fn enqueue(&self, message: Message) {
        let registrations = self.dispatcher.lookup(&message.address);
        if registrations.is_empty() {
            ServerStats::incr(&self.stats().messages_unmatched);
            trace!("No handler for {}", message.address);
            return;
        }

        let permit = match self.jobs.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                ServerStats::incr(&self.stats().messages_dropped);
                self.ctx.report(DeliveryError::QueueFull {
                    address: message.address,
                });
                return;
            }
            Err(TrySendError::Closed(())) => {
                debug!("Workers gone, dropping {}", message.address);
                return;
            }
        };

        // Tickets are only taken once the job is certain to be queued
        let targets = registrations
            .into_iter()
            .map(|registration| {
                let ticket = registration.lane.ticket();
                (registration, ticket)
            })
            .collect();

        permit.send(Job { message, targets });
        ServerStats::incr(&self.stats().messages_queued);
    }
}

async fn receive_loop(
    socket: UdpSocket,
    intake: Intake,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<RwLock<ServerState>>,
) -> Result<()> {
    let mut buf = vec![0u8; intake.max_packet_size + 1];
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => {
                    consecutive_errors = 0;
                    intake.handle_datagram(&buf[..len], peer);
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = match read_failure(&e, consecutive_errors) {
                        ReadFailure::Closed => {
                            *state.write() = ServerState::Stopped;
                            intake.ctx.report(DeliveryError::SocketClosed(e.to_string()));
                            return Err(RouterError::Transport(e));
                        }
                        ReadFailure::Retry(delay) => delay,
                    };
                    ServerStats::incr(&intake.stats().receive_errors);
                    intake.ctx.report(DeliveryError::Receive(e.to_string()));

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            },
        }
    }

    debug!("Receive loop on {:?} exiting", socket.local_addr().ok());
    Ok(())
}

/// What the receive loop does after a failed read
#[derive(Debug, PartialEq, Eq)]
enum ReadFailure {
    /// The socket is gone; stop listening
    Closed,
    /// Count the error and read again after the delay
    Retry(Duration),
}

fn read_failure(e: &io::Error, consecutive: u32) -> ReadFailure {
    if is_fatal(e) {
        ReadFailure::Closed
    } else {
        ReadFailure::Retry(receive_backoff(consecutive))
    }
}

/// No pause for an isolated error, then 1ms doubling up to the cap
fn receive_backoff(consecutive: u32) -> Duration {
    match consecutive {
        0 | 1 => Duration::ZERO,
        n => RECEIVE_BACKOFF_STEP
            .saturating_mul(1 << (n - 2).min(7))
            .min(MAX_RECEIVE_BACKOFF),
    }
}

fn is_fatal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::Unsupported
    )
}
