//! Operation server.
//!
//! Exposes every registered operation over TCP as newline-delimited JSON.
//! Each request line yields exactly one response line:
//!
//! ```text
//! {"op":"list"}                                   -> {"ok":true,"operations":[...]}
//! {"op":"invoke","id":"power-on"}                 -> {"ok":true,"reply":{"message":"06"}}
//! {"op":"call","method":"GET","path":"/power/get"} -> {"ok":true,"reply":{"message":"1d0100","label":"on"}}
//! ```
//!
//! Failures come back as `{"ok":false,"error":"...","frame":"beef..."}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::commands::{Command, CommandHandler, Method, OperationRegistry, Reply};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation {0} registered twice")]
    DuplicateOperation(String),

    #[error("Route {method} {path} registered twice")]
    DuplicateRoute { method: Method, path: String },
}

/// Registered handlers, addressable by operation id or by route.
#[derive(Debug, Default)]
pub struct Router {
    by_id: HashMap<String, CommandHandler>,
    by_route: HashMap<(Method, String), String>,
    order: Vec<String>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registered commands, response maps included, in registration order.
    pub fn operations(&self) -> Vec<&Command> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|handler| handler.command().as_ref())
            .collect()
    }

    pub fn by_id(&self, id: &str) -> Option<&CommandHandler> {
        self.by_id.get(id)
    }

    pub fn by_route(&self, method: Method, path: &str) -> Option<&CommandHandler> {
        self.by_route
            .get(&(method, path.to_string()))
            .and_then(|id| self.by_id.get(id))
    }

    /// Answer one request.
    pub async fn dispatch(&self, request: Request) -> Envelope {
        let handler = match &request {
            Request::List => {
                return Envelope::operations(self.operations().into_iter().cloned().collect())
            }
            Request::Invoke { id } => self.by_id(id),
            Request::Call { method, path } => self.by_route(*method, path),
        };

        let Some(handler) = handler else {
            return Envelope::failure(format!("No such operation: {}", request.target()), None);
        };

        match handler.call().await {
            Ok(reply) => Envelope::reply(reply),
            Err(err) => Envelope::failure(err.to_string(), Some(err.frame.to_hex())),
        }
    }
}

impl OperationRegistry for Router {
    type Error = ServerError;

    fn register(&mut self, handler: CommandHandler) -> Result<(), ServerError> {
        let descriptor = handler.descriptor();
        let id = descriptor.id.clone();
        let route = (descriptor.method, descriptor.path.clone());

        if self.by_id.contains_key(&id) {
            return Err(ServerError::DuplicateOperation(id));
        }
        if self.by_route.contains_key(&route) {
            return Err(ServerError::DuplicateRoute {
                method: route.0,
                path: route.1,
            });
        }

        self.by_route.insert(route, id.clone());
        self.by_id.insert(id.clone(), handler);
        self.order.push(id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    List,
    Invoke { id: String },
    Call { method: Method, path: String },
}

impl Request {
    fn target(&self) -> String {
        match self {
            Request::List => "list".to_string(),
            Request::Invoke { id } => id.clone(),
            Request::Call { method, path } => format!("{method} {path}"),
        }
    }
}

/// One response line.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Command>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl Envelope {
    fn empty(ok: bool) -> Self {
        Self {
            ok,
            reply: None,
            operations: None,
            error: None,
            frame: None,
        }
    }

    pub fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            ..Self::empty(true)
        }
    }

    pub fn operations(operations: Vec<Command>) -> Self {
        Self {
            operations: Some(operations),
            ..Self::empty(true)
        }
    }

    pub fn failure(error: String, frame: Option<String>) -> Self {
        Self {
            error: Some(error),
            frame,
            ..Self::empty(false)
        }
    }
}

/// Pause after a failed accept so a full descriptor table does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept clients until `shutdown` flips to true, then give open clients
/// `grace` to finish their current request.
///
/// Failed accepts are logged and retried; only shutdown ends the loop.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<(), ServerError> {
    log::info!(
        "Serving {} operations on {}",
        router.len(),
        listener.local_addr()?
    );

    let mut clients = JoinSet::new();
    loop {
        let client_shutdown = shutdown.clone();
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(client) => client,
                    Err(e) => {
                        log::warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                log::info!("Client connected: {}", peer);
                let router = router.clone();
                clients.spawn(async move {
                    if let Err(e) = handle_client(stream, router, client_shutdown).await {
                        log::warn!("Client {} error: {}", peer, e);
                    }
                    log::info!("Client disconnected: {}", peer);
                });
            }
            _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    drop(listener);
    log::info!("Stopped accepting; waiting up to {:?} for {} clients", grace, clients.len());

    let drained = timeout(grace, async {
        while clients.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        log::warn!("Aborting {} clients after {:?}", clients.len(), grace);
        clients.abort_all();
        while clients.join_next().await.is_some() {}
    }

    Ok(())
}

/// Serve one client until it hangs up or shutdown begins.
///
/// A request already being dispatched when shutdown begins is still answered.
pub async fn handle_client<S>(
    stream: S,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => break,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                log::debug!("Request: {:?}", request);
                router.dispatch(request).await
            }
            Err(e) => Envelope::failure(format!("Invalid request: {e}"), None),
        };

        let mut out = serde_json::to_vec(&envelope)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::x55;
    use crate::commands::{derive_operations, register_all};
    use crate::serial::{SerialInterface, SerialPortIO, TransportSettings};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::io::duplex;

    /// Answers every frame with the same bytes.
    struct EchoPort {
        reply: Vec<u8>,
        pending: VecDeque<u8>,
    }

    #[async_trait]
    impl SerialPortIO for EchoPort {
        async fn send_data(&mut self, _data: &[u8]) -> crate::serial::Result<()> {
            self.pending = self.reply.iter().copied().collect();
            Ok(())
        }

        async fn read_data(
            &mut self,
            buf: &mut [u8],
            _idle: Duration,
        ) -> crate::serial::Result<usize> {
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap_or_default();
            }
            Ok(n)
        }

        async fn flush(&mut self) -> crate::serial::Result<()> {
            Ok(())
        }
    }

    fn router(reply: &[u8]) -> Arc<Router> {
        let port = EchoPort {
            reply: reply.to_vec(),
            pending: VecDeque::new(),
        };
        let transport = Arc::new(SerialInterface::from_io(
            "mock",
            Box::new(port),
            TransportSettings::new(19200),
        ));
        let commands: Vec<_> = derive_operations(&x55::catalog())
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .collect();

        let mut router = Router::new();
        register_all(&mut router, &commands, &transport).unwrap();
        Arc::new(router)
    }

    async fn exchange(router: Arc<Router>, requests: &[&str]) -> Vec<serde_json::Value> {
        let (client, server) = duplex(4096);
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(handle_client(server, router, rx));

        let (reader, mut writer) = tokio::io::split(client);
        let mut lines = BufReader::new(reader).lines();
        let mut out = Vec::new();
        for request in requests {
            writer.write_all(request.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            let line = lines.next_line().await.unwrap().unwrap();
            out.push(serde_json::from_str(&line).unwrap());
        }
        drop(writer);
        drop(lines);
        task.await.unwrap().unwrap();
        out
    }

    #[test]
    fn test_registry_rejects_duplicate_operation() {
        let router = router(&[0x06]);
        let handler = router.by_id("power-on").unwrap().clone();

        let mut second = Router::new();
        second.register(handler.clone()).unwrap();
        assert!(matches!(
            second.register(handler),
            Err(ServerError::DuplicateOperation(id)) if id == "power-on"
        ));
    }

    #[test]
    fn test_routes_resolve_to_operations() {
        let router = router(&[0x06]);
        assert_eq!(
            router.by_route(Method::Post, "/power/on").unwrap().descriptor().id,
            "power-on"
        );
        assert!(router.by_route(Method::Get, "/power/on").is_none());
        assert_eq!(router.operations()[0].id(), "power-off");
    }

    #[tokio::test]
    async fn test_list_and_call_over_lines() {
        let responses = exchange(
            router(&[0x1d, 0x01, 0x00]),
            &[
                r#"{"op":"list"}"#,
                r#"{"op":"call","method":"GET","path":"/power/get"}"#,
            ],
        )
        .await;

        assert_eq!(responses[0]["ok"], true);
        let ops = responses[0]["operations"].as_array().unwrap();
        assert!(ops.iter().any(|op| op["id"] == "input-s-video"));

        let power = ops.iter().find(|op| op["id"] == "power-get").unwrap();
        let labels = power["responses"].as_array().unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[1]["label"], "on");
        assert_eq!(labels[1]["value"], "0100");
        assert_eq!(power["frame"], "beef03060019d3020000600000");
        assert!(ops
            .iter()
            .find(|op| op["id"] == "power-on")
            .unwrap()
            .get("responses")
            .is_none());

        assert_eq!(responses[1]["ok"], true);
        assert_eq!(responses[1]["reply"]["message"], "1d0100");
        assert_eq!(responses[1]["reply"]["label"], "on");
    }

    #[tokio::test]
    async fn test_bad_requests_get_error_lines() {
        let responses = exchange(
            router(&[0x06]),
            &[
                "not json",
                r#"{"op":"invoke","id":"power-sideways"}"#,
                r#"{"op":"invoke","id":"power-on"}"#,
            ],
        )
        .await;

        assert_eq!(responses[0]["ok"], false);
        assert!(responses[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));
        assert_eq!(responses[1]["ok"], false);
        assert_eq!(responses[2]["ok"], true);
        assert_eq!(responses[2]["reply"]["message"], "06");
    }

    #[tokio::test]
    async fn test_transport_failure_reports_frame() {
        let router = router(&[0x06]);
        router
            .by_id("power-on")
            .unwrap()
            .transport()
            .disconnect()
            .await
            .unwrap();

        let responses = exchange(router, &[r#"{"op":"invoke","id":"power-on"}"#]).await;
        assert_eq!(responses[0]["ok"], false);
        assert_eq!(responses[0]["frame"], "beef030600bad2010000600100");
    }

    #[tokio::test]
    async fn test_client_stops_on_shutdown() {
        let (_client, server) = duplex(64);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(handle_client(server, router(&[0x06]), rx));

        tx.send_replace(true);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_answers_over_tcp_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(
            listener,
            router(&[0x06]),
            rx,
            Duration::from_millis(200),
        ));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{\"op\":\"list\"}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let listed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(listed["ok"], true);
        assert_eq!(listed["operations"].as_array().unwrap().len(), 25);

        writer
            .write_all(b"{\"op\":\"invoke\",\"id\":\"power-on\"}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let invoked: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(invoked["reply"]["message"], "06");

        tx.send_replace(true);
        timeout(Duration::from_secs(2), server)
            .await
            .expect("server stops after shutdown")
            .unwrap()
            .unwrap();

        // The client task closed its half once shutdown began.
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
