//! Network client for the Graphite plaintext protocol.
//!
//! The client splits a payload into batches and sends them, in order, over TCP or UDP. Every write is gated by a
//! [`CircuitBreaker`]: after repeated transport failures, writes are rejected without attempting any I/O until the
//! backoff period has elapsed.

use std::{fmt, io, str::FromStr, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    formatter::NameFormatter,
    payload::{BatchError, GraphitePayload},
};

mod breaker;
pub use self::breaker::CircuitBreaker;

mod transport;
use self::transport::Connection;

/// Default port of the Graphite plaintext listener.
pub const DEFAULT_PORT: u16 = 2003;

const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_FAILURES_BEFORE_BACKOFF: u64 = 3;
const DEFAULT_BACKOFF_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that could occur while parsing an endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The address had no `<scheme>://` prefix.
    #[error("missing scheme in '{address}' (expected 'net.tcp://', 'net.udp://' or 'net.pickled://')")]
    MissingScheme {
        /// The rejected address.
        address: String,
    },

    /// The scheme is not one of the supported Graphite schemes.
    #[error("unsupported scheme '{scheme}' (expected 'net.tcp', 'net.udp' or 'net.pickled')")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// The address had no host.
    #[error("missing host in '{address}'")]
    MissingHost {
        /// The rejected address.
        address: String,
    },

    /// The port was not a valid, non-zero port number.
    #[error("invalid port '{port}'")]
    InvalidPort {
        /// The rejected port.
        port: String,
    },
}

/// Errors that could occur while writing a payload.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The circuit breaker is open, and no I/O was attempted.
    #[error("too many failures in writing to Graphite, circuit opened")]
    CircuitOpen,

    /// The configured protocol is not implemented.
    ///
    /// This is a configuration problem rather than a transient one, and is never counted toward the circuit breaker.
    #[error("pickled protocol not implemented, use UDP or TCP")]
    ProtocolNotImplemented,

    /// The payload could not be split into batches.
    #[error("failed to batch payload: {0}")]
    Batch(#[from] BatchError),

    /// The write was cancelled.
    ///
    /// Batches sent before cancellation are not rolled back.
    #[error("write cancelled after {batches_sent} batch(es) were sent")]
    Cancelled {
        /// Number of batches sent before cancellation.
        batches_sent: usize,
    },

    /// Connecting to, or sending to, the remote server failed.
    #[error("failed to write to Graphite after {batches_sent} batch(es) were sent: {source}")]
    Transport {
        /// Number of batches sent before the failure.
        batches_sent: usize,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    /// Returns `true` if this error was counted toward the circuit breaker.
    pub fn is_transport(&self) -> bool {
        matches!(self, WriteError::Transport { .. })
    }

    /// Returns the number of batches that were sent before the write failed.
    pub fn batches_sent(&self) -> usize {
        match self {
            WriteError::Cancelled { batches_sent } | WriteError::Transport { batches_sent, .. } => *batches_sent,
            _ => 0,
        }
    }
}

/// Transport protocol used to reach the remote server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Newline-delimited lines over a TCP stream.
    Tcp,

    /// One datagram per batch over UDP.
    Udp,

    /// The pickle protocol.
    ///
    /// Accepted when parsing an endpoint, but not implemented: writes fail with
    /// [`WriteError::ProtocolNotImplemented`].
    Pickled,
}

impl Protocol {
    /// Returns the URI scheme of the protocol.
    pub const fn scheme(self) -> &'static str {
        match self {
            Protocol::Tcp => "net.tcp",
            Protocol::Udp => "net.udp",
            Protocol::Pickled => "net.pickled",
        }
    }

    /// Returns a short transport identifier, such as `tcp`.
    pub const fn transport_id(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Pickled => "pickled",
        }
    }
}

/// Address of a Graphite server.
///
/// Endpoints are parsed from URIs of the form `<scheme>://<host>[:<port>]`, where the scheme is one of `net.tcp`,
/// `net.udp` or `net.pickled`, matched case-insensitively. The port defaults to 2003, and IPv6 hosts must be
/// enclosed in brackets (`net.udp://[::1]:2003`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    protocol: Protocol,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from its parts.
    pub fn new<H: Into<String>>(protocol: Protocol, host: H, port: u16) -> Self {
        Self { protocol, host: host.into(), port }
    }

    /// Returns the protocol of the endpoint.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the host of the endpoint, without brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port of the endpoint.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(Protocol::Tcp, "127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.protocol.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol.scheme(), self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> Result<u16, EndpointError> {
    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(EndpointError::InvalidPort { port: port.to_owned() }),
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = address
            .trim()
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme { address: address.to_owned() })?;

        let protocol = match scheme.to_ascii_lowercase().as_str() {
            "net.tcp" => Protocol::Tcp,
            "net.udp" => Protocol::Udp,
            "net.pickled" => Protocol::Pickled,
            _ => return Err(EndpointError::UnsupportedScheme { scheme: scheme.to_owned() }),
        };

        // Anything after the authority (a trailing slash or a path) is ignored.
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointError::MissingHost { address: address.to_owned() })?;
            let port = match after.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if after.is_empty() => DEFAULT_PORT,
                None => return Err(EndpointError::InvalidPort { port: after.to_owned() }),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, DEFAULT_PORT),
            }
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost { address: address.to_owned() });
        }

        Ok(Endpoint::new(protocol, host, port))
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = EndpointError;

    fn try_from(address: &str) -> Result<Self, Self::Error> {
        address.parse()
    }
}

/// Policy governing how the client batches, times out, and backs off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientPolicy {
    /// Maximum number of points per batch.
    ///
    /// Defaults to 1000.
    pub batch_size: usize,

    /// Number of failed writes after which the circuit breaker opens. Zero disables the breaker.
    ///
    /// Defaults to 3.
    pub failures_before_backoff: u64,

    /// How long the circuit breaker stays open.
    ///
    /// Defaults to 30 seconds.
    pub backoff_period: Duration,

    /// Timeout applied to connecting and to each send.
    ///
    /// Defaults to 30 seconds.
    pub timeout: Duration,

    /// Whether a TCP connection is kept open between writes.
    ///
    /// When disabled, a new connection is opened for every write and shut down once the write completes.
    ///
    /// Defaults to `true`.
    pub persistent_connection: bool,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            failures_before_backoff: DEFAULT_FAILURES_BEFORE_BACKOFF,
            backoff_period: DEFAULT_BACKOFF_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            persistent_connection: true,
        }
    }
}

/// Summary of a successful write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Number of batches sent.
    pub batches: usize,

    /// Number of points sent.
    pub points: usize,

    /// Number of bytes sent.
    pub bytes: usize,
}

/// A client that writes payloads to a Graphite server.
///
/// Only one write is in flight at a time per client: concurrent calls to [`write`][GraphiteClient::write] are
/// serialized, so batches from different payloads are never interleaved on the wire.
pub struct GraphiteClient {
    endpoint: Endpoint,
    policy: ClientPolicy,
    formatter: Arc<dyn NameFormatter>,
    breaker: Arc<CircuitBreaker>,
    connection: Mutex<Option<Connection>>,
}

impl GraphiteClient {
    /// Creates a new `GraphiteClient`.
    ///
    /// The client owns a circuit breaker configured from the policy.
    pub fn new(endpoint: Endpoint, policy: ClientPolicy, formatter: Arc<dyn NameFormatter>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(policy.failures_before_backoff, policy.backoff_period));
        Self { endpoint, policy, formatter, breaker, connection: Mutex::new(None) }
    }

    /// Replaces the circuit breaker of this client.
    ///
    /// This allows several clients to share their backoff state, or a breaker to be driven by a custom clock. The
    /// breaker's own threshold and backoff period take precedence over the policy.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Returns the endpoint of this client.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the policy of this client.
    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// Returns the circuit breaker of this client.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Writes the payload to the remote server.
    ///
    /// The payload is split into batches of at most `batch_size` points, which are sent sequentially and in order. The
    /// cancellation token is checked before each batch and raced against each send: a cancelled write keeps the
    /// batches already sent, and drops the connection it was using.
    ///
    /// # Errors
    ///
    /// - [`WriteError::ProtocolNotImplemented`] if the endpoint uses the pickle protocol.
    /// - [`WriteError::CircuitOpen`] if the circuit breaker is open. No I/O is attempted.
    /// - [`WriteError::Batch`] if the batch size is zero.
    /// - [`WriteError::Cancelled`] if the token was cancelled before the write completed.
    /// - [`WriteError::Transport`] if connecting or sending failed. Only these errors are counted toward the circuit
    ///   breaker.
    pub async fn write(
        &self,
        payload: &GraphitePayload,
        cancel: &CancellationToken,
    ) -> Result<WriteSummary, WriteError> {
        if self.endpoint.protocol() == Protocol::Pickled {
            return Err(WriteError::ProtocolNotImplemented);
        }

        if self.breaker.should_backoff() {
            return Err(WriteError::CircuitOpen);
        }

        let batches = payload.to_batches(self.policy.batch_size)?;
        let mut summary = WriteSummary::default();
        if payload.is_empty() {
            return Ok(summary);
        }

        let mut connection = self.connection.lock().await;
        for batch in batches {
            if cancel.is_cancelled() {
                *connection = None;
                return Err(WriteError::Cancelled { batches_sent: summary.batches });
            }

            let text = batch.to_text(&*self.formatter);
            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.send_batch(&mut connection, text.as_bytes()) => Some(result),
            };

            match sent {
                None => {
                    *connection = None;
                    return Err(WriteError::Cancelled { batches_sent: summary.batches });
                }
                Some(Err(source)) => {
                    *connection = None;
                    let failures = self.breaker.record_failure();
                    debug!(
                        endpoint = %self.endpoint,
                        error = %source,
                        failures,
                        batches_sent = summary.batches,
                        "Failed to send batch."
                    );
                    return Err(WriteError::Transport { batches_sent: summary.batches, source });
                }
                Some(Ok(())) => {
                    summary.batches += 1;
                    summary.points += batch.len();
                    summary.bytes += text.len();
                    trace!(points = batch.len(), bytes = text.len(), "Sent batch.");
                }
            }
        }

        if !self.policy.persistent_connection {
            if let Some(conn) = connection.take() {
                if let Err(e) = conn.close(self.policy.timeout).await {
                    debug!(endpoint = %self.endpoint, error = %e, "Failed to shut down connection.");
                }
            }
        }

        Ok(summary)
    }

    async fn send_batch(&self, slot: &mut Option<Connection>, buf: &[u8]) -> io::Result<()> {
        let conn = match slot.take() {
            Some(conn) if conn.is_reusable() => conn,
            previous => {
                if previous.is_some() {
                    debug!(endpoint = %self.endpoint, "Connection closed by Graphite, reconnecting.");
                }
                debug!(endpoint = %self.endpoint, "Connecting to Graphite.");
                Connection::connect(&self.endpoint, self.policy.timeout).await?
            }
        };

        slot.insert(conn).send(buf, self.policy.timeout).await
    }

    /// Closes the connection held by this client, if any.
    ///
    /// The next write opens a new connection.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            if let Err(e) = conn.close(self.policy.timeout).await {
                debug!(endpoint = %self.endpoint, error = %e, "Failed to shut down connection.");
            }
        }
    }
}

impl fmt::Debug for GraphiteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphiteClient")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{TimeZone as _, Utc};
    use quanta::Clock;
    use tokio::{
        io::{AsyncBufReadExt as _, AsyncReadExt as _, BufReader},
        net::{TcpListener, UdpSocket},
    };
    use tokio_util::sync::CancellationToken;

    use super::{
        CircuitBreaker, ClientPolicy, Endpoint, EndpointError, GraphiteClient, Protocol, WriteError, WriteSummary,
    };
    use crate::{formatter::PathNameFormatter, payload::GraphitePayload, point::GraphitePoint};

    fn payload_of(len: usize) -> GraphitePayload {
        let timestamp = Utc.with_ymd_and_hms(2017, 1, 1, 1, 1, 1).unwrap();
        (0..len)
            .map(|i| {
                GraphitePoint::builder(format!("point{i}")).field("value", i as u64).timestamp(timestamp).build().unwrap()
            })
            .collect()
    }

    fn client(endpoint: Endpoint, batch_size: usize) -> GraphiteClient {
        let policy = ClientPolicy { batch_size, timeout: Duration::from_secs(5), ..ClientPolicy::default() };
        GraphiteClient::new(endpoint, policy, Arc::new(PathNameFormatter::new()))
    }

    // A single line far larger than loopback socket buffers, so sending it stalls once the server stops reading.
    fn oversized_point(timestamp_secs: i64) -> GraphitePoint {
        let timestamp = Utc.timestamp_opt(timestamp_secs, 0).unwrap();
        GraphitePoint::builder("big").field("value", "x".repeat(32 * 1024 * 1024)).timestamp(timestamp).build().unwrap()
    }

    async fn refused_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::new(Protocol::Tcp, "127.0.0.1", port)
    }

    #[test]
    fn parses_endpoints() {
        let cases = [
            ("net.tcp://localhost:2003", Endpoint::new(Protocol::Tcp, "localhost", 2003)),
            ("NET.UDP://10.0.0.1:8125", Endpoint::new(Protocol::Udp, "10.0.0.1", 8125)),
            ("net.pickled://graphite:2004/", Endpoint::new(Protocol::Pickled, "graphite", 2004)),
            ("net.tcp://graphite", Endpoint::new(Protocol::Tcp, "graphite", 2003)),
            ("net.udp://[::1]:2003", Endpoint::new(Protocol::Udp, "::1", 2003)),
            ("net.tcp://[fe80::1]", Endpoint::new(Protocol::Tcp, "fe80::1", 2003)),
        ];

        for (input, expected) in cases {
            assert_eq!(input.parse::<Endpoint>(), Ok(expected), "parsing {input}");
        }
    }

    #[test]
    fn rejects_invalid_endpoints() {
        assert_eq!(
            "http://localhost:2003".parse::<Endpoint>(),
            Err(EndpointError::UnsupportedScheme { scheme: "http".to_owned() })
        );
        assert_eq!(
            "localhost:2003".parse::<Endpoint>(),
            Err(EndpointError::MissingScheme { address: "localhost:2003".to_owned() })
        );
        assert_eq!(
            "net.tcp://:2003".parse::<Endpoint>(),
            Err(EndpointError::MissingHost { address: "net.tcp://:2003".to_owned() })
        );
        assert_eq!(
            "net.tcp://localhost:0".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort { port: "0".to_owned() })
        );
        assert_eq!(
            "net.tcp://localhost:http".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort { port: "http".to_owned() })
        );
    }

    #[test]
    fn displays_endpoints() {
        assert_eq!(Endpoint::default().to_string(), "net.tcp://127.0.0.1:2003");
        assert_eq!(Endpoint::new(Protocol::Udp, "::1", 2003).to_string(), "net.udp://[::1]:2003");
    }

    #[tokio::test]
    async fn tcp_write_sends_batches_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut received = Vec::new();
            while received.len() < 10 {
                match lines.next_line().await.unwrap() {
                    Some(line) => received.push(line),
                    None => break,
                }
            }
            received
        });

        let client = client(Endpoint::new(Protocol::Tcp, "127.0.0.1", port), 3);
        let payload = payload_of(5);

        let first = client.write(&payload, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.batches, 2);
        assert_eq!(first.points, 5);

        // The second write reuses the connection accepted above.
        let second = client.write(&payload, &CancellationToken::new()).await.unwrap();
        assert_eq!(first, second);

        let received = server.await.unwrap();
        let expected: Vec<_> = (0..10).map(|i| format!("point{n}.value {n} 1483232461", n = i % 5)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn reconnects_after_server_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = client(Endpoint::new(Protocol::Tcp, "127.0.0.1", port), 10);
        let cancel = CancellationToken::new();

        client.write(&payload_of(1), &cancel).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("point0.value 0 1483232461"));
        drop(lines);

        // Let the runtime observe the closed stream.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let summary = client.write(&payload_of(2), &cancel).await.unwrap();
        assert_eq!(summary.points, 2);

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("point0.value 0 1483232461"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("point1.value 1 1483232461"));
        assert_eq!(client.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn closed_connection_to_stopped_server_counts_as_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = client(Endpoint::new(Protocol::Tcp, "127.0.0.1", port), 10);
        let cancel = CancellationToken::new();

        client.write(&payload_of(1), &cancel).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
        drop(listener);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = client.write(&payload_of(1), &cancel).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
        assert_eq!(err.batches_sent(), 0);
        assert_eq!(client.breaker().failures(), 1);
    }

    #[tokio::test]
    async fn send_timeout_counts_as_failure() {
        // The connection is left in the accept queue and never read from.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let policy = ClientPolicy { timeout: Duration::from_millis(200), ..ClientPolicy::default() };
        let endpoint = Endpoint::new(Protocol::Tcp, "127.0.0.1", port);
        let client = GraphiteClient::new(endpoint, policy, Arc::new(PathNameFormatter::new()));

        let payload: GraphitePayload = std::iter::once(oversized_point(1_483_232_461)).collect();
        let err = client.write(&payload, &CancellationToken::new()).await.unwrap_err();
        match &err {
            WriteError::Transport { batches_sent, source } => {
                assert_eq!(*batches_sent, 0);
                assert_eq!(source.kind(), std::io::ErrorKind::TimedOut);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.breaker().failures(), 1);
        drop(listener);
    }

    #[tokio::test]
    async fn cancellation_during_send_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = client(Endpoint::new(Protocol::Tcp, "127.0.0.1", port), 1);

        let mut payload = payload_of(1);
        payload.add(oversized_point(1_483_232_461));

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };

        let err = client.write(&payload, &cancel).await.unwrap_err();
        assert!(matches!(err, WriteError::Cancelled { batches_sent: 1 }), "unexpected error: {err}");
        assert_eq!(client.breaker().failures(), 0);
        canceller.await.unwrap();

        // The half-written stream was dropped, so the server reads the first batch and then end-of-stream.
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await.unwrap().unwrap();
        assert!(received.starts_with(b"point0.value 0 1483232461\nbig.value xxx"));
        assert!(received.len() < 32 * 1024 * 1024);
    }

    #[tokio::test]
    async fn udp_write_sends_one_datagram_per_batch() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let client = client(Endpoint::new(Protocol::Udp, "127.0.0.1", port), 2);
        let summary = client.write(&payload_of(3), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.batches, 2);

        let mut buf = [0u8; 1024];
        let len = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"point0.value 0 1483232461\npoint1.value 1 1483232461\n");

        let len = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"point2.value 2 1483232461\n");
        assert_eq!(summary.bytes, 3 * "point0.value 0 1483232461\n".len());
    }

    #[tokio::test]
    async fn empty_payload_is_not_sent() {
        let client = client(refused_endpoint().await, 10);
        let summary = client.write(&GraphitePayload::new(), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary, WriteSummary::default());
        assert_eq!(client.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_failures() {
        let (clock, mock) = Clock::mock();
        let breaker = Arc::new(CircuitBreaker::with_clock(3, Duration::from_secs(30), clock));
        let client = client(refused_endpoint().await, 10).with_breaker(Arc::clone(&breaker));
        let payload = payload_of(1);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let err = client.write(&payload, &cancel).await.unwrap_err();
            assert!(err.is_transport(), "unexpected error: {err}");
        }
        assert_eq!(breaker.failures(), 3);

        let err = client.write(&payload, &cancel).await.unwrap_err();
        assert!(matches!(err, WriteError::CircuitOpen));
        assert_eq!(breaker.failures(), 3);

        mock.increment(Duration::from_secs(31));
        let err = client.write(&payload, &cancel).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(breaker.failures(), 1);
    }

    #[tokio::test]
    async fn pickled_protocol_is_not_implemented() {
        let client = client(Endpoint::new(Protocol::Pickled, "127.0.0.1", 2004), 10);
        for _ in 0..5 {
            let err = client.write(&payload_of(1), &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, WriteError::ProtocolNotImplemented));
        }
        assert_eq!(client.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn cancelled_write_is_not_counted() {
        let client = client(refused_endpoint().await, 10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.write(&payload_of(1), &cancel).await.unwrap_err();
        assert!(matches!(err, WriteError::Cancelled { batches_sent: 0 }));
        assert_eq!(client.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let client = client(refused_endpoint().await, 0);
        let err = client.write(&payload_of(1), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WriteError::Batch(_)));
        assert_eq!(client.breaker().failures(), 0);
    }
}
