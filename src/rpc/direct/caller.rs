use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::event::{ErrorChannel, ErrorListener};
use crate::exception::{Exception, RpcResult};
use crate::rpc::codec::RpcCodec;
use crate::rpc::envelope::{RpcRequest, RpcResponse};
use crate::rpc::{CallerTimeout, RpcCaller, RpcCallerOptions};

/// 以 HTTP 直接呼叫處理端
pub struct HttpRpcCaller {
    name: String,
    client: Client,
    base_address: RwLock<Option<String>>,
    timeout: CallerTimeout,
    codec: RpcCodec,
    errors: ErrorChannel,
}

impl HttpRpcCaller {
    pub fn new(name: impl Into<String>, codec: RpcCodec) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            base_address: RwLock::new(None),
            timeout: CallerTimeout::default(),
            codec,
            errors: ErrorChannel::new(),
        }
    }

    /// 主機名稱或 IP 加連接埠，不含協定
    pub fn base_address(&self) -> Option<String> {
        self.base_address.read().clone()
    }

    pub fn set_base_address(&self, address: impl Into<String>) {
        let address: String = address.into();
        *self.base_address.write() = Some(address.trim_end_matches('/').to_string());
    }

    fn endpoint(&self, options: &RpcCallerOptions) -> RpcResult<String> {
        if options.raw_dest.is_some() {
            return Err(Exception::minor("Raw destination is not supported by direct RPC"));
        }
        options.validate()?;
        let base = self
            .base_address()
            .ok_or_else(|| Exception::critical("Base URL must be set!"))?;
        Ok(format!(
            "http://{}/{}/{}",
            base, options.module_name, options.action_name
        ))
    }

    fn transport_error(&self, err: reqwest::Error, waited: Duration) -> Exception {
        if err.is_timeout() {
            return Exception::Timeout {
                waited_ms: waited.as_millis() as u64,
            };
        }
        Exception::minor(format!("RPC error: {}", err)).with_details(json!({
            "error": err.to_string(),
            "url": err.url().map(|u| u.to_string()),
        }))
    }
}

#[async_trait]
impl RpcCaller for HttpRpcCaller {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout.duration()
    }

    fn set_timeout(&self, millis: u64) {
        self.timeout.set(millis);
    }

    async fn init(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn call(&self, options: RpcCallerOptions) -> RpcResult<RpcResponse> {
        let uri = self.endpoint(&options)?;
        let request = RpcRequest::new(self.name.clone(), options.module_name, options.params);
        let waited = self.timeout();
        debug!("Calling: {}", uri);

        let response = self
            .client
            .post(&uri)
            .timeout(waited)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e, waited))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e, waited))?;
        let envelope = serde_json::from_slice::<RpcResponse>(&body).ok();

        match (status, envelope) {
            (status, Some(envelope)) if status.is_success() => self.codec.resolve_reply(envelope),
            (StatusCode::INTERNAL_SERVER_ERROR, Some(envelope)) if !envelope.is_success => {
                self.codec.resolve_reply(envelope)
            }
            (StatusCode::INTERNAL_SERVER_ERROR, _) => {
                Err(Exception::critical("Remote handler failed").with_details(raw_failure(status, &body)))
            }
            (status, _) => Err(Exception::minor(format!(
                "RPC error: request to {} failed with status {}",
                uri, status
            ))
            .with_details(raw_failure(status, &body))),
        }
    }

    async fn dispose(&self) -> RpcResult<()> {
        self.errors.clear();
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) {
        self.errors.add_listener(listener);
    }
}

fn raw_failure(status: StatusCode, body: &[u8]) -> Value {
    let body = serde_json::from_slice::<Value>(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
    json!({ "status": status.as_u16(), "body": body })
}
