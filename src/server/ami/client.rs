//! Manager-protocol client: one authenticated TCP session to the switch.
//!
//! The connection runs two tasks: a writer draining serialized frames to the
//! socket and a read loop that parses blocks and routes them. Responses are
//! correlated to callers by `ActionID`; everything else flows out of the
//! event channel in arrival order. Socket failures fail all outstanding
//! calls with `ConnectionLost`; reconnecting is the supervisor's job alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::protocol::{AmiAction, AmiEvent, AmiMessage, AmiResponse, MessageParser};
use super::{AmiConfig, AmiError};

/// Event enumeration actions can stream hundreds of blocks; give them more
/// room than a plain response.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_QUEUE: usize = 1024;

enum Pending {
    Single(oneshot::Sender<AmiResponse>),
    List {
        response: Option<AmiResponse>,
        events: Vec<AmiEvent>,
        done: oneshot::Sender<(AmiResponse, Vec<AmiEvent>)>,
    },
}

struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    connected: AtomicBool,
    cancel: CancellationToken,
    execute_timeout: Duration,
}

impl Shared {
    /// Drop every outstanding waiter; their receivers resolve to
    /// `ConnectionLost` on the caller side.
    async fn fail_outstanding(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.lock().await.clear();
    }
}

/// Cloneable handle for issuing actions over the live connection.
#[derive(Clone)]
pub struct AmiHandle {
    shared: Arc<Shared>,
    writer: mpsc::Sender<String>,
    next_id: Arc<AtomicU64>,
}

impl AmiHandle {
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, id: u64, action: &AmiAction) -> Result<(), AmiError> {
        if !self.is_connected() {
            self.shared.pending.lock().await.remove(&id);
            return Err(AmiError::ConnectionLost);
        }
        if self.writer.send(action.serialize(id)).await.is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(AmiError::ConnectionLost);
        }
        Ok(())
    }

    /// Send an action and wait for its correlated response. A timeout frees
    /// the caller; the response, if it eventually arrives unmatched, is
    /// dropped by the read loop.
    pub async fn execute(&self, action: AmiAction) -> Result<AmiResponse, AmiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .await
            .insert(id, Pending::Single(tx));

        self.send_frame(id, &action).await?;

        match tokio::time::timeout(self.shared.execute_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AmiError::ConnectionLost),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(AmiError::Timeout(action.name))
            }
        }
    }

    /// Send an enumeration action and collect its response plus the event
    /// list that follows, up to the closing `...ListComplete` event.
    pub async fn execute_list(
        &self,
        action: AmiAction,
    ) -> Result<(AmiResponse, Vec<AmiEvent>), AmiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(
            id,
            Pending::List {
                response: None,
                events: Vec::new(),
                done: tx,
            },
        );

        self.send_frame(id, &action).await?;

        match tokio::time::timeout(LIST_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AmiError::ConnectionLost),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(AmiError::Timeout(action.name))
            }
        }
    }
}

/// One live manager session. Dropping it (or calling `close`) tears the
/// socket tasks down.
pub struct AmiConnection {
    shared: Arc<Shared>,
    writer: mpsc::Sender<String>,
    next_id: Arc<AtomicU64>,
}

impl AmiConnection {
    /// Connect, read the protocol banner and authenticate. The returned
    /// receiver carries unsolicited events in arrival order; it closes when
    /// the connection dies.
    pub async fn open(
        config: &AmiConfig,
    ) -> Result<(Self, mpsc::Receiver<AmiEvent>), AmiError> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                AmiError::Connect(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })?
            .map_err(AmiError::Connect)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // The switch greets with a single banner line before framing starts.
        let mut banner = String::new();
        reader
            .read_line(&mut banner)
            .await
            .map_err(AmiError::Connect)?;
        if !banner.contains("Asterisk Call Manager") {
            tracing::warn!("unexpected manager banner: {}", banner.trim());
        }

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            execute_timeout: config.execute_timeout,
        });

        let (writer_tx, writer_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<AmiEvent>(EVENT_QUEUE);

        tokio::spawn(write_loop(write_half, writer_rx, shared.clone()));
        tokio::spawn(read_loop(reader, event_tx, shared.clone()));

        let connection = Self {
            shared,
            writer: writer_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let login = AmiAction::new("Login")
            .param("Username", config.username.clone())
            .param("Secret", config.secret.clone());

        match connection.handle().execute(login).await {
            Ok(response) if response.success => {
                tracing::info!("authenticated against manager interface at {}", addr);
                Ok((connection, event_rx))
            }
            Ok(response) => {
                connection.close();
                Err(AmiError::Auth(
                    response
                        .message
                        .unwrap_or_else(|| "login rejected".to_string()),
                ))
            }
            Err(AmiError::Timeout(_)) => {
                connection.close();
                Err(AmiError::Auth("no answer to login".to_string()))
            }
            Err(e) => {
                connection.close();
                Err(e)
            }
        }
    }

    pub fn handle(&self) -> AmiHandle {
        AmiHandle {
            shared: self.shared.clone(),
            writer: self.writer.clone(),
            next_id: self.next_id.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Tear the session down. Outstanding calls fail with `ConnectionLost`.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }
}

impl Drop for AmiConnection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut frames: mpsc::Receiver<String>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = socket.write_all(frame.as_bytes()).await {
                    tracing::warn!("manager socket write failed: {}", e);
                    shared.cancel.cancel();
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    event_tx: mpsc::Sender<AmiEvent>,
    shared: Arc<Shared>,
) {
    let mut parser = MessageParser::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };

        match read {
            Ok(0) => {
                tracing::warn!("manager socket closed by the switch");
                break;
            }
            Ok(_) => {
                if let Some(message) = parser.push_line(&line) {
                    route_message(message, &event_tx, &shared).await;
                }
            }
            Err(e) => {
                tracing::warn!("manager socket read failed: {}", e);
                break;
            }
        }
    }

    shared.cancel.cancel();
    shared.fail_outstanding().await;
    // event_tx drops here, closing the stream for the supervisor
}

async fn route_message(
    message: AmiMessage,
    event_tx: &mpsc::Sender<AmiEvent>,
    shared: &Arc<Shared>,
) {
    if let Some(id) = message.action_id() {
        let mut pending = shared.pending.lock().await;
        match pending.remove(&id) {
            Some(Pending::Single(done)) => {
                if message.is_response() {
                    let _ = done.send(message.into_response());
                } else {
                    // An async follow-up event for a completed action slot;
                    // treat it as unsolicited.
                    pending.insert(id, Pending::Single(done));
                    drop(pending);
                    forward_event(message, event_tx).await;
                }
                return;
            }
            Some(Pending::List {
                mut response,
                mut events,
                done,
            }) => {
                if message.is_response() {
                    let parsed = message.into_response();
                    if !parsed.success {
                        // The action itself was rejected; no list follows.
                        let _ = done.send((parsed, events));
                        return;
                    }
                    response = Some(parsed);
                } else if let Some(event) = message.into_event() {
                    if event.is_list_complete() {
                        let response = response.unwrap_or(AmiResponse {
                            success: true,
                            message: None,
                            fields: HashMap::new(),
                        });
                        let _ = done.send((response, events));
                        return;
                    }
                    events.push(event);
                }
                pending.insert(
                    id,
                    Pending::List {
                        response,
                        events,
                        done,
                    },
                );
                return;
            }
            None => {
                if message.is_response() {
                    tracing::warn!(
                        action_id = id,
                        "dropping response with no outstanding request"
                    );
                    return;
                }
                // Late event carrying the ActionID of an already-answered
                // action (e.g. async Originate outcomes): unsolicited.
                drop(pending);
                forward_event(message, event_tx).await;
                return;
            }
        }
    } else if message.is_response() {
        tracing::warn!("dropping response without ActionID");
        return;
    }

    forward_event(message, event_tx).await;
}

async fn forward_event(message: AmiMessage, event_tx: &mpsc::Sender<AmiEvent>) {
    if let Some(event) = message.into_event() {
        // Backpressure on the aggregator; if nobody is listening the event
        // is simply discarded.
        let _ = event_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use tokio::net::TcpListener;

    async fn read_action(reader: &mut BufReader<OwnedReadHalf>) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        fields
    }

    fn config_for(port: u16) -> AmiConfig {
        AmiConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "admin".to_string(),
            secret: "admin_secret".to_string(),
            execute_timeout: Duration::from_secs(2),
        }
    }

    /// Fake switch: accepts one session, greets, answers the login, then
    /// hands the socket to the test's handler.
    async fn spawn_switch<F, Fut>(handler: F) -> u16
    where
        F: FnOnce(BufReader<OwnedReadHalf>, OwnedWriteHalf) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            write_half
                .write_all(b"Asterisk Call Manager/5.0\r\n")
                .await
                .unwrap();
            let login = read_action(&mut reader).await;
            let id = login.get("ActionID").cloned().unwrap_or_default();
            write_half
                .write_all(
                    format!(
                        "Response: Success\r\nActionID: {}\r\nMessage: Authentication accepted\r\n\r\n",
                        id
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();

            handler(reader, write_half).await;
        });

        port
    }

    #[tokio::test]
    async fn test_login_and_execute() {
        let port = spawn_switch(|mut reader, mut writer| async move {
            let action = read_action(&mut reader).await;
            let id = action.get("ActionID").cloned().unwrap_or_default();
            writer
                .write_all(
                    format!("Response: Success\r\nActionID: {}\r\nPing: Pong\r\n\r\n", id)
                        .as_bytes(),
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let (connection, _events) = AmiConnection::open(&config_for(port)).await.unwrap();
        let response = connection
            .handle()
            .execute(AmiAction::new("Ping"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.fields.get("Ping").map(String::as_str), Some("Pong"));
    }

    #[tokio::test]
    async fn test_rejected_login_is_an_auth_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            write_half
                .write_all(b"Asterisk Call Manager/5.0\r\n")
                .await
                .unwrap();
            let login = read_action(&mut reader).await;
            let id = login.get("ActionID").cloned().unwrap_or_default();
            write_half
                .write_all(
                    format!(
                        "Response: Error\r\nActionID: {}\r\nMessage: Authentication failed\r\n\r\n",
                        id
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        match AmiConnection::open(&config_for(port)).await {
            Err(AmiError::Auth(message)) => assert!(message.contains("Authentication failed")),
            other => panic!("expected auth error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_unsolicited_events_reach_the_stream() {
        let port = spawn_switch(|_reader, mut writer| async move {
            writer
                .write_all(
                    b"Event: PeerStatus\r\nPeer: PJSIP/1001\r\nPeerStatus: Reachable\r\n\r\n",
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let (_connection, mut events) = AmiConnection::open(&config_for(port)).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "PeerStatus");
        assert_eq!(event.get("Peer"), Some("PJSIP/1001"));
    }

    #[tokio::test]
    async fn test_socket_close_fails_outstanding_and_ends_stream() {
        let port = spawn_switch(|mut reader, writer| async move {
            // Swallow the action, then hang up without answering.
            let _ = read_action(&mut reader).await;
            drop(writer);
            drop(reader);
        })
        .await;

        let (connection, mut events) = AmiConnection::open(&config_for(port)).await.unwrap();

        let result = connection.handle().execute(AmiAction::new("Ping")).await;
        assert!(matches!(result, Err(AmiError::ConnectionLost)));
        assert!(events.recv().await.is_none());
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_execute_list_collects_until_list_complete() {
        let port = spawn_switch(|mut reader, mut writer| async move {
            let action = read_action(&mut reader).await;
            let id = action.get("ActionID").cloned().unwrap_or_default();
            let frames = format!(
                "Response: Success\r\nActionID: {id}\r\nEventList: start\r\n\r\n\
                 Event: EndpointList\r\nActionID: {id}\r\nObjectName: 1001\r\nDeviceState: Not in use\r\n\r\n\
                 Event: EndpointList\r\nActionID: {id}\r\nObjectName: 1002\r\nDeviceState: Unavailable\r\n\r\n\
                 Event: EndpointListComplete\r\nActionID: {id}\r\nListItems: 2\r\n\r\n",
            );
            writer.write_all(frames.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let (connection, _events) = AmiConnection::open(&config_for(port)).await.unwrap();

        let (response, items) = connection
            .handle()
            .execute_list(AmiAction::new("PJSIPShowEndpoints"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("ObjectName"), Some("1001"));
        assert_eq!(items[1].get("ObjectName"), Some("1002"));
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped_and_events_still_flow() {
        let port = spawn_switch(|_reader, mut writer| async move {
            // A response nobody asked for, then a normal event.
            writer
                .write_all(b"Response: Success\r\nActionID: 9999\r\n\r\n")
                .await
                .unwrap();
            writer
                .write_all(b"Event: Hangup\r\nLinkedid: L-1\r\n\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let (_connection, mut events) = AmiConnection::open(&config_for(port)).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "Hangup");
    }
}
