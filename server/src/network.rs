//! Server network layer: accept loop, per-connection sessions, and the
//! aggregation workers that drain the ingestion queue.
//!
//! The orchestrator wires the bounded queue, the connection registry, the
//! ranking engine, and the event log together, then runs the accept loop.
//! Each accepted socket gets its own session task that reads the handshake,
//! dispatches subsequent lines (record / ranking request / final request),
//! and tears the connection down on peer close, transport error, or
//! broadcast shutdown.
//!
//! Shutdown sequencing: stop accepting, shut down the queue, shut down every
//! tracked connection, wait for the aggregation workers to drain, then flush
//! the event log.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use shared::{
    parse_handshake, parse_message, ClientMessage, Competitor, DEFAULT_PORT, PUSH_TIMEOUT,
    QUEUE_CAPACITY, SERVER_LOG_FILE,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::connection::{Connection, ConnectionRegistry};
use crate::error::ServerError;
use crate::event_log::EventLog;
use crate::finalize;
use crate::queue::BoundedQueue;
use crate::ranking::RankingEngine;

/// Server construction parameters.
///
/// The reader pool is the runtime the server runs on (sized by the binary);
/// `writers` is the number of aggregation worker tasks the orchestrator
/// spawns. The output directory and log path are configurable so tests can
/// redirect the persisted files; the file names themselves are fixed.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    /// Number of aggregation worker tasks (`p_w`).
    pub writers: usize,
    /// Ranking cache validity window in milliseconds (`delta_t`).
    pub delta_t_ms: i64,
    /// Ingestion queue capacity.
    pub queue_capacity: usize,
    /// Directory the final dump files are written to.
    pub out_dir: PathBuf,
    /// Path of the append-only event log.
    pub log_path: PathBuf,
}

impl ServerConfig {
    /// Config with the default port, queue capacity, and file locations.
    pub fn new(writers: usize, delta_t_ms: i64) -> Self {
        Self {
            port: DEFAULT_PORT,
            writers,
            delta_t_ms,
            queue_capacity: QUEUE_CAPACITY,
            out_dir: PathBuf::from("."),
            log_path: PathBuf::from(SERVER_LOG_FILE),
        }
    }
}

/// Cloneable handle for requesting server shutdown.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Asks the server to stop accepting and drain. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Shared dependencies handed to every session task.
#[derive(Clone)]
struct SessionContext {
    queue: Arc<BoundedQueue<Competitor>>,
    registry: Arc<ConnectionRegistry>,
    ranking: Arc<RankingEngine>,
    event_log: Arc<EventLog>,
    out_dir: PathBuf,
}

/// Main server coordinating ingestion, ranking, and finalization.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    queue: Arc<BoundedQueue<Competitor>>,
    registry: Arc<ConnectionRegistry>,
    ranking: Arc<RankingEngine>,
    event_log: Arc<EventLog>,
    shutdown: Arc<Notify>,
}

impl Server {
    /// Binds the listener and opens the event log.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let event_log = Arc::new(EventLog::open(&config.log_path)?);
        info!("server listening on {}", listener.local_addr()?);

        Ok(Self {
            queue: Arc::new(BoundedQueue::new(config.queue_capacity)),
            registry: Arc::new(ConnectionRegistry::new()),
            ranking: Arc::new(RankingEngine::new(config.delta_t_ms)),
            event_log,
            shutdown: Arc::new(Notify::new()),
            config,
            listener,
        })
    }

    /// Address the listener is bound to. Useful when the port was 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for triggering shutdown from signal handlers or tests.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the accept loop until shutdown is requested, then drains.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("starting {} aggregation worker(s)", self.config.writers);
        let mut workers = Vec::with_capacity(self.config.writers);
        for worker_id in 0..self.config.writers {
            workers.push(tokio::spawn(aggregation_worker(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.ranking),
            )));
        }

        let context = SessionContext {
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
            ranking: Arc::clone(&self.ranking),
            event_log: Arc::clone(&self.event_log),
            out_dir: self.config.out_dir.clone(),
        };

        self.event_log.record("server accepting connections");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = context.clone();
                        tokio::spawn(async move {
                            handle_session(stream, peer, context).await;
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                    }
                },
                _ = self.shutdown.notified() => {
                    info!("shutdown requested; draining");
                    break;
                }
            }
        }

        self.queue.shutdown();
        self.registry.shutdown_all().await;
        for worker in workers {
            let _ = worker.await;
        }
        self.ranking.abandon_pending();
        self.event_log.record("server stopped");
        self.event_log.flush();
        info!("server stopped");
        Ok(())
    }
}

/// Drains the ingestion queue into the authoritative store.
///
/// Loops on the bounded pop so shutdown is noticed within one wait interval;
/// exits once the queue is shut down and fully drained. Never sorts.
async fn aggregation_worker(
    worker_id: usize,
    queue: Arc<BoundedQueue<Competitor>>,
    ranking: Arc<RankingEngine>,
) {
    debug!("aggregation worker {worker_id} started");
    loop {
        match queue.try_pop().await {
            Some(competitor) => ranking.append(competitor),
            None => {
                if !queue.is_active() && queue.is_empty() {
                    break;
                }
            }
        }
    }
    debug!("aggregation worker {worker_id} stopped");
}

/// Reads the next line, racing the connection's shutdown signal.
///
/// Returns `None` on peer close, transport error, or shutdown; the caller
/// ends the session in all three cases.
async fn read_session_line(
    reader: &mut BufReader<OwnedReadHalf>,
    connection: &Connection,
) -> Option<String> {
    let mut line = String::new();
    tokio::select! {
        result = reader.read_line(&mut line) => match result {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(e) => {
                warn!("connection {} read error: {e}", connection.id());
                None
            }
        },
        _ = connection.closed() => None,
    }
}

async fn close_session(context: &SessionContext, connection: &Connection) {
    context.registry.remove(connection.id());
    connection.shutdown().await;
}

/// Per-connection session: handshake, then line dispatch until the session
/// ends.
async fn handle_session(stream: TcpStream, peer: SocketAddr, context: SessionContext) {
    let (read_half, write_half) = stream.into_split();
    let connection = context.registry.insert(peer, write_half);
    let mut reader = BufReader::new(read_half);

    let country_id = match read_session_line(&mut reader, &connection).await {
        Some(line) => match parse_handshake(&line) {
            Ok(country_id) => country_id,
            Err(e) => {
                warn!("connection {}: {e}", connection.id());
                close_session(&context, &connection).await;
                return;
            }
        },
        None => {
            close_session(&context, &connection).await;
            return;
        }
    };

    info!("connection {} bound to country {}", connection.id(), country_id);
    context
        .event_log
        .record(&format!("client connected: country {country_id}"));

    while connection.is_active() {
        let line = match read_session_line(&mut reader, &connection).await {
            Some(line) => line,
            None => break,
        };

        match parse_message(&line) {
            Ok(ClientMessage::Record {
                competitor_id,
                score,
            }) => {
                let record = Competitor {
                    country_id,
                    competitor_id,
                    score,
                };
                if !context.queue.push(record, PUSH_TIMEOUT).await {
                    warn!("queue full; dropped record {record} from country {country_id}");
                    context
                        .event_log
                        .record(&format!("dropped record {record} from country {country_id}"));
                }
            }
            Ok(ClientMessage::RankingRequest) => {
                match Arc::clone(&context.ranking).request_ranking().await {
                    Ok(payload) => {
                        if let Err(e) = connection.send(payload.as_bytes()).await {
                            warn!("connection {} ranking write failed: {e}", connection.id());
                            break;
                        }
                        context
                            .event_log
                            .record(&format!("sent ranking to country {country_id}"));
                    }
                    Err(e) => {
                        // A broken recompute fails this request only; the
                        // session stays up for the next line.
                        warn!("connection {} ranking request failed: {e}", connection.id());
                    }
                }
            }
            Ok(ClientMessage::FinalRequest) => {
                match finalize::write_final_results(&context.ranking, &context.out_dir) {
                    Ok(dump) => {
                        if let Err(e) = connection.send(dump.as_bytes()).await {
                            warn!("connection {} final write failed: {e}", connection.id());
                        } else {
                            context.event_log.record("sent final results");
                        }
                    }
                    Err(e) => {
                        error!("finalization failed: {e}");
                        context
                            .event_log
                            .record(&format!("finalization failed: {e}"));
                    }
                }
                break;
            }
            Err(e) => {
                debug!("connection {}: {e}; line dropped", connection.id());
                context
                    .event_log
                    .record(&format!("dropped malformed line from country {country_id}"));
            }
        }
    }

    close_session(&context, &connection).await;
    context
        .event_log
        .record(&format!("client disconnected: country {country_id}"));
}
