use async_trait::async_trait;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::RpcConfig;
use crate::event::{ErrorChannel, ErrorListener};
use crate::exception::{Exception, RpcResult};
use crate::rpc::action::{invoke_action, RawMessage, RpcHandlerFunction};
use crate::rpc::codec::RpcCodec;
use crate::rpc::envelope::{RpcRequest, RpcResponse};
use crate::rpc::RpcHandler;

/// 預設監聽的連接埠
pub const DEFAULT_HANDLER_PORT: u16 = 30000;

static URL_TESTER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]*$").ok());

/// 模組與動作名稱只能包含英數字、底線與連字號
pub fn is_url_safe(name: &str) -> bool {
    URL_TESTER.as_ref().is_some_and(|re| re.is_match(name))
}

/// 依模組分組的動作表
type ActionTable = HashMap<String, HashMap<String, RpcHandlerFunction>>;

struct HandlerState {
    name: String,
    open: AtomicBool,
    actions: RwLock<ActionTable>,
    codec: RpcCodec,
    errors: ErrorChannel,
}

impl HandlerState {
    fn find(&self, module: &str, action: &str) -> Option<RpcHandlerFunction> {
        self.actions.read().get(module)?.get(action).cloned()
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// 以 HTTP 提供動作的處理端
pub struct HttpRpcHandler {
    host: String,
    port: AtomicU16,
    initialized: AtomicBool,
    state: Arc<HandlerState>,
    server: tokio::sync::Mutex<Option<RunningServer>>,
}

impl HttpRpcHandler {
    pub fn new(name: impl Into<String>, codec: RpcCodec) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: AtomicU16::new(DEFAULT_HANDLER_PORT),
            initialized: AtomicBool::new(false),
            state: Arc::new(HandlerState {
                name: name.into(),
                open: AtomicBool::new(false),
                actions: RwLock::new(HashMap::new()),
                codec,
                errors: ErrorChannel::new(),
            }),
            server: tokio::sync::Mutex::new(None),
        }
    }

    /// 以配置中的位址與連接埠建立
    pub fn from_config(name: impl Into<String>, codec: RpcCodec, config: &RpcConfig) -> RpcResult<Self> {
        let handler = Self::new(name, codec).with_host(config.handler_host.clone());
        handler.set_port(u32::from(config.handler_port))?;
        Ok(handler)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// 設定連接埠，0 表示由系統分配
    pub fn set_port(&self, port: u32) -> RpcResult<()> {
        match u16::try_from(port) {
            Ok(port) => {
                self.port.store(port, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(Exception::critical("INVALID_PORT_DIRECT_RPC_HANDLER")
                .with_details(serde_json::json!({ "port": port }))),
        }
    }

    /// 伺服器實際監聽的位址，啟動後才有值
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.addr)
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn assert_initialized(&self) -> RpcResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Exception::minor("`init` method must be called first!"));
        }
        Ok(())
    }

    fn router(&self) -> Router {
        let state = self.state.clone();
        Router::new()
            .route("/{module}/{action}", post(dispatch))
            // 暫停時拒絕所有請求，在解析 JSON 之前執行
            .layer(middleware::from_fn_with_state(state.clone(), gate))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new())
                    .on_response(DefaultOnResponse::new()),
            )
            .with_state(state)
    }
}

async fn gate(State(state): State<Arc<HandlerState>>, request: Request, next: Next) -> Response {
    if !state.open.load(Ordering::SeqCst) {
        return StatusCode::GONE.into_response();
    }
    next.run(request).await
}

async fn dispatch(
    State(state): State<Arc<HandlerState>>,
    Path((module, action)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Response {
    let Some(action_fn) = state.find(&module, &action) else {
        debug!("No action registered for /{}/{}", module, action);
        return StatusCode::NOT_FOUND.into_response();
    };

    let caller = request.from.clone();
    let raw = RawMessage::Http {
        method,
        uri,
        headers,
    };

    match invoke_action(&action_fn, request, raw).await {
        Ok(result) => {
            let response = state.codec.create_response(true, result, &state.name, &caller);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(rejection) => {
            if !rejection.is_intended {
                error!("Action /{}/{} failed unexpectedly", module, action);
                state.errors.emit_shared(rejection.reason.to_error());
            }
            let error = state.codec.create_error(&rejection);
            let response = RpcResponse::failure(state.name.clone(), caller, &error);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

#[async_trait]
impl RpcHandler for HttpRpcHandler {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn init(&self) -> RpcResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Exception::critical("This RPC handler is already initialized!"));
        }
        if self.state.name.trim().is_empty() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(Exception::critical("`name` property must be set!"));
        }
        Ok(())
    }

    async fn handle(&self, module: &str, action: &str, handler: RpcHandlerFunction) -> RpcResult<()> {
        self.assert_initialized()?;
        if module.is_empty() || !is_url_safe(module) {
            return Err(Exception::minor(format!("Module name \"{}\" is not URL-safe!", module)));
        }
        if action.is_empty() || !is_url_safe(action) {
            return Err(Exception::minor(format!("Action name \"{}\" is not URL-safe!", action)));
        }

        let mut actions = self.state.actions.write();
        let module_actions = actions.entry(module.to_string()).or_insert_with(|| {
            debug!("Created router for module: {}", module);
            HashMap::new()
        });
        if module_actions.insert(action.to_string(), handler).is_some() {
            warn!("Action {} of module {} is overridden", action, module);
        }
        debug!("Registered action: {} to module {}", action, module);
        Ok(())
    }

    async fn start(&self) -> RpcResult<()> {
        self.assert_initialized()?;
        let mut server = self.server.lock().await;
        if server.is_some() {
            self.state.open.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| Exception::critical(format!("Invalid handler host \"{}\": {}", self.host, e)))?;
        let listener = TcpListener::bind(SocketAddr::new(ip, self.port()))
            .await
            .map_err(|e| Exception::wrap(e, "Failed to bind RPC handler"))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Exception::wrap(e, "Failed to bind RPC handler"))?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        let errors = self.state.errors.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                errors.emit(Exception::wrap(err, "RPC handler server error"));
            }
        });

        self.state.open.store(true, Ordering::SeqCst);
        info!("RPC handler {} listening on {}", self.state.name, addr);
        *server = Some(RunningServer {
            addr,
            shutdown,
            task,
        });
        Ok(())
    }

    async fn pause(&self) -> RpcResult<()> {
        self.state.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> RpcResult<()> {
        self.state.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) -> RpcResult<()> {
        self.state.open.store(false, Ordering::SeqCst);
        let Some(server) = self.server.lock().await.take() else {
            return Ok(());
        };

        let _ = server.shutdown.send(());
        if let Err(err) = server.task.await {
            warn!("RPC handler server task ended abnormally: {}", err);
        }
        info!("RPC handler {} stopped", self.state.name);
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) {
        self.state.errors.add_listener(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_url_safe_names() {
        assert!(is_url_safe("orders"));
        assert!(is_url_safe("get-by_id2"));
        assert!(!is_url_safe("orders/create"));
        assert!(!is_url_safe("a b"));
        assert!(!is_url_safe("ordérs"));
    }

    #[test]
    fn test_port_validation() {
        let handler = HttpRpcHandler::new("orders", RpcCodec::default());
        assert_eq!(handler.port(), DEFAULT_HANDLER_PORT);
        handler.set_port(8080).unwrap();
        assert_eq!(handler.port(), 8080);
        handler.set_port(0).unwrap();

        let err = handler.set_port(70000).unwrap_err();
        assert_matches!(err, Exception::Critical { ref message, .. } if message == "INVALID_PORT_DIRECT_RPC_HANDLER");
    }

    #[tokio::test]
    async fn test_init_only_once() {
        let handler = HttpRpcHandler::new("orders", RpcCodec::default());
        handler.init().await.unwrap();
        assert!(handler.init().await.is_err());
    }

    #[tokio::test]
    async fn test_handle_requires_init_and_safe_names() {
        let handler = HttpRpcHandler::new("orders", RpcCodec::default());
        let noop = crate::rpc::action::action_fn(|_| async { Ok(()) });
        assert!(handler.handle("orders", "create", noop.clone()).await.is_err());

        handler.init().await.unwrap();
        assert!(handler.handle("orders", "create", noop.clone()).await.is_ok());
        assert!(handler.handle("orders/x", "create", noop.clone()).await.is_err());
        assert!(handler.handle("orders", "cre ate", noop.clone()).await.is_err());
        assert!(handler.handle("", "create", noop).await.is_err());
    }

    #[tokio::test]
    async fn test_dispose_before_start() {
        let handler = HttpRpcHandler::new("orders", RpcCodec::default());
        assert!(handler.dispose().await.is_ok());
        assert!(handler.local_addr().await.is_none());
    }
}
