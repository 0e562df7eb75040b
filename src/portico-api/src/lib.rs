pub mod reload;
pub mod reply;

pub use reload::*;

use anyhow::Result;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::tokio::TokioIo;
use matchit::{Params, Router};
use portico_core::{
    CredentialStore, MetricsStore, NewRoute, ProxyRequest, RoutePatch, RouteStore,
};
use portico_errors::ControlError;
use portico_fleet::Fleet;
use reply::{ok, json_reply, read_json, simple, ApiError, ApiResult};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Authorization, Content-Type, X-Request-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Health,
    Login,
    Logout,
    Routes,
    Route,
    RouteSelect,
    Metrics,
    Proxies,
    Proxy,
    ProxyRetry,
    Reload,
}

impl Endpoint {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            Endpoint::Health => &["GET"],
            Endpoint::Login | Endpoint::Logout | Endpoint::RouteSelect => &["POST"],
            Endpoint::ProxyRetry | Endpoint::Reload => &["POST"],
            Endpoint::Routes | Endpoint::Metrics | Endpoint::Proxies => &["GET", "POST"],
            Endpoint::Route => &["GET", "PUT", "DELETE"],
            Endpoint::Proxy => &["GET", "DELETE"],
        }
    }

    fn public(self) -> bool {
        matches!(self, Endpoint::Health | Endpoint::Login)
    }
}

fn router() -> Result<Router<Endpoint>> {
    let mut r = Router::new();
    r.insert("/healthz", Endpoint::Health)?;
    r.insert("/login", Endpoint::Login)?;
    r.insert("/logout", Endpoint::Logout)?;
    r.insert("/routes", Endpoint::Routes)?;
    r.insert("/routes/{id}", Endpoint::Route)?;
    r.insert("/routes/{id}/select", Endpoint::RouteSelect)?;
    r.insert("/metrics", Endpoint::Metrics)?;
    r.insert("/admin/proxies", Endpoint::Proxies)?;
    r.insert("/admin/proxies/{ip}/{port}", Endpoint::Proxy)?;
    r.insert("/admin/proxies/{ip}/{port}/retry", Endpoint::ProxyRetry)?;
    r.insert("/admin/nginx/reload", Endpoint::Reload)?;
    Ok(r)
}

/// Registries and hooks the Control API dispatches to.
#[derive(Clone)]
pub struct ApiState {
    pub routes: Arc<dyn RouteStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub fleet: Arc<Fleet>,
    pub auth: Arc<CredentialStore>,
    pub reloader: Arc<dyn Reloader>,
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsDelta {
    #[serde(default)]
    path: String,
    #[serde(default)]
    bytes_in: u64,
    #[serde(default)]
    bytes_out: u64,
}

/// Owned copy of the matched path parameters.
struct PathArgs(Vec<(String, String)>);

impl PathArgs {
    fn from_params(params: &Params<'_, '_>) -> Self {
        Self(params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn get(&self, key: &str) -> &str {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()).unwrap_or_default()
    }

    fn port(&self) -> Result<u16, ApiError> {
        let raw = self.get("port");
        raw.parse()
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("`{raw}` is not a port")))
    }
}

/// HTTP front of the control plane.
pub struct ControlApi {
    state: ApiState,
    router: Router<Endpoint>,
    server: HeaderValue,
    cors_origin: HeaderValue,
}

impl ControlApi {
    pub fn new(name: &str, cors_origin: &str, state: ApiState) -> Result<Self> {
        Ok(Self {
            state,
            router: router()?,
            server: HeaderValue::from_str(&format!("{name}/{APP_VERSION}"))?,
            cors_origin: HeaderValue::from_str(cors_origin)?,
        })
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("control API listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let me = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let conn = http1::Builder::new().serve_connection(
                    io,
                    service_fn(move |req| {
                        let me = me.clone();
                        async move { me.handle(req).await }
                    }),
                );
                if let Err(e) = conn.await {
                    debug!(peer = %peer, "conn error: {e}");
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let start = Instant::now();
        let request_id = req
            .headers()
            .get("x-request-id")
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .cloned()
            .unwrap_or_else(|| {
                HeaderValue::from_str(&Uuid::new_v4().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
            });
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let resp = match self.dispatch(req).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        };

        let status = resp.status();
        let latency_ms = start.elapsed().as_millis();
        if status.is_server_error() {
            warn!(request_id = ?request_id, %method, %path, status = status.as_u16(), latency_ms, "request failed");
        } else {
            info!(request_id = ?request_id, %method, %path, status = status.as_u16(), latency_ms, "request");
        }
        Ok(self.default_headers(resp, request_id, start))
    }

    async fn dispatch(&self, req: Request<Incoming>) -> ApiResult {
        let matched = self
            .router
            .at(req.uri().path())
            .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, format!("no such endpoint: {}", req.uri().path())))?;
        let endpoint = *matched.value;
        let args = PathArgs::from_params(&matched.params);

        if req.method() == Method::OPTIONS {
            return Ok(simple(StatusCode::NO_CONTENT, Bytes::new(), "text/plain"));
        }
        if !endpoint.allowed().contains(&req.method().as_str()) {
            let mut resp = ApiError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("{} is not allowed on {}", req.method(), req.uri().path()),
            )
            .into_response();
            let allow = endpoint.allowed().join(", ");
            if let Ok(v) = HeaderValue::from_str(&allow) {
                resp.headers_mut().insert(header::ALLOW, v);
            }
            return Ok(resp);
        }

        let token = if endpoint.public() {
            None
        } else {
            let token = bearer(req.headers())?;
            self.state.auth.validate(&token)?;
            Some(token)
        };

        let (parts, body) = req.into_parts();
        let st = &self.state;
        match (endpoint, parts.method) {
            (Endpoint::Health, _) => Ok(simple(StatusCode::OK, Bytes::from_static(b"ok"), "text/plain")),

            (Endpoint::Login, _) => {
                let login: LoginBody = read_json(body).await?;
                if login.username.is_empty() || login.password.is_empty() {
                    return Err(ControlError::validation("username and password are required").into());
                }
                let token = st.auth.authenticate(&login.username, &login.password)?;
                ok(&json!({ "token": token, "expiresIn": st.auth.token_ttl().as_secs() }))
            }
            (Endpoint::Logout, _) => {
                if let Some(token) = token {
                    st.auth.revoke(&token);
                }
                ok(&json!({ "message": "logged out" }))
            }

            (Endpoint::Routes, Method::GET) => ok(&st.routes.list()),
            (Endpoint::Routes, _) => {
                let new: NewRoute = read_json(body).await?;
                json_reply(StatusCode::CREATED, &st.routes.create(new)?)
            }
            (Endpoint::Route, Method::GET) => ok(&st.routes.get(args.get("id"))?),
            (Endpoint::Route, Method::PUT) => {
                let patch: RoutePatch = read_json(body).await?;
                ok(&st.routes.update(args.get("id"), patch)?)
            }
            (Endpoint::Route, _) => {
                let id = args.get("id");
                st.routes.delete(id)?;
                ok(&json!({ "deleted": id }))
            }
            (Endpoint::RouteSelect, _) => ok(&json!({ "target": st.routes.select_target(args.get("id"))? })),

            (Endpoint::Metrics, Method::GET) => ok(&st.metrics.snapshot()),
            (Endpoint::Metrics, _) => {
                let delta: MetricsDelta = read_json(body).await?;
                if delta.path.trim().is_empty() {
                    return Err(ControlError::validation("path is required").into());
                }
                st.metrics.record(&delta.path, delta.bytes_in, delta.bytes_out);
                ok(&json!({ "recorded": delta.path }))
            }

            (Endpoint::Proxies, Method::GET) => ok(&st.fleet.list()),
            (Endpoint::Proxies, _) => {
                let req: ProxyRequest = read_json(body).await?;
                debug!(request = ?req, "add proxy");
                let credential = req.credential()?;
                let proxy = st.fleet.add(&req.ip, req.port, &req.username, credential)?;
                json_reply(StatusCode::CREATED, &proxy)
            }
            (Endpoint::Proxy, Method::GET) => ok(&st.fleet.get(args.get("ip"), args.port()?)?),
            (Endpoint::Proxy, _) => {
                let (ip, port) = (args.get("ip"), args.port()?);
                st.fleet.remove(ip, port)?;
                ok(&json!({ "deleted": format!("{ip}:{port}") }))
            }
            (Endpoint::ProxyRetry, _) => {
                let req: ProxyRequest = read_json(body).await?;
                let credential = req.credential()?;
                ok(&st.fleet.retry(args.get("ip"), args.port()?, &req.username, credential)?)
            }

            (Endpoint::Reload, _) => {
                st.reloader.reload().await?;
                ok(&json!({ "message": "data plane reloaded" }))
            }
        }
    }

    fn default_headers(
        &self,
        mut resp: Response<Full<Bytes>>,
        request_id: HeaderValue,
        start: Instant,
    ) -> Response<Full<Bytes>> {
        let elapsed = start.elapsed();
        let headers = resp.headers_mut();
        headers.insert(header::SERVER, self.server.clone());
        headers.insert("X-Request-Id", request_id);
        headers.insert("X-Latency", HeaderValue::from(elapsed.as_millis() as u64));
        headers.insert("X-Latency-Us", HeaderValue::from(elapsed.as_micros() as u64));
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.cors_origin.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("X-Request-Id, X-Latency"));
        resp
    }
}

fn bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlError::auth("missing bearer token"))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim().to_string())
        }
        _ => Err(ControlError::auth("malformed authorization header").into()),
    }
}
