//! Integration tests for Tidecart.
//!
//! The tests run the engine against [`MockServer`], an in-process axum app
//! that speaks the cart server's HTTP contract. Failures, delays and
//! per-product sale rejections are scripted per test.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tidecart-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tidecart_sync::{RetryPolicies, RetryPolicy, SyncConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

/// Server endpoints, for scripting and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Cart,
    Add,
    Remove,
    Update,
    Clear,
    Products,
    Sales,
}

/// A request as the server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub route: Route,
    /// Decoded path, without the leading slash.
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

struct Failure {
    status: StatusCode,
    body: Value,
    remaining: Option<u32>,
}

#[derive(Default)]
struct Inner {
    carts: HashMap<String, Vec<Value>>,
    products: Vec<Value>,
    next_line: i64,
    failures: HashMap<Route, Failure>,
    delays: HashMap<Route, Duration>,
    sale_failures: HashMap<i64, StatusCode>,
    sales: Vec<Value>,
    requests: Vec<Recorded>,
}

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

impl Inner {
    /// Record the request and apply any scripted failure.
    fn hit(
        &mut self,
        route: Route,
        path: String,
        body: Option<Value>,
        headers: &HeaderMap,
    ) -> Result<(), (StatusCode, Json<Value>)> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(ToOwned::to_owned);
        self.requests.push(Recorded {
            route,
            path,
            body,
            bearer,
        });

        let Some(failure) = self.failures.get_mut(&route) else {
            return Ok(());
        };
        let reply = (failure.status, Json(failure.body.clone()));
        if let Some(remaining) = &mut failure.remaining {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.failures.remove(&route);
            }
        }
        Err(reply)
    }

    fn find_line(&self, line_id: &str) -> Option<(String, usize)> {
        self.carts.iter().find_map(|(email, lines)| {
            lines
                .iter()
                .position(|line| text(&line["id_item"]).as_deref() == Some(line_id))
                .map(|index| (email.clone(), index))
        })
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn not_found(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "erro": message })))
}

#[derive(Clone, Default)]
struct MockState(Arc<Mutex<Inner>>);

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self, route: Route) {
        let delay = self.lock().delays.get(&route).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn get_cart(
    State(state): State<MockState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.pause(Route::Cart).await;
    let mut inner = state.lock();
    inner.hit(Route::Cart, format!("carrinho/{email}"), None, &headers)?;
    let lines = inner.carts.get(&email).cloned().unwrap_or_default();
    Ok(Json(json!({ "carrinho": lines })))
}

async fn add_line(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.pause(Route::Add).await;
    let mut inner = state.lock();
    inner.hit(Route::Add, "carrinho/adicionar".to_owned(), Some(body.clone()), &headers)?;

    let email = body["email_cliente"].as_str().unwrap_or_default().to_owned();
    let product_id = body["id_produto"].as_i64().unwrap_or_default();
    let quantity = body["quantidade"].as_u64().unwrap_or(1);
    let product = inner
        .products
        .iter()
        .find(|p| p["id_produto"].as_i64() == Some(product_id))
        .cloned()
        .ok_or_else(|| not_found("Produto não encontrado"))?;

    inner.next_line += 1;
    let line_id = inner.next_line;
    inner.carts.entry(email).or_default().push(json!({
        "id_item": line_id,
        "id_produto": product_id,
        "nome_produto": product["nome"],
        "quantidade": quantity,
        "preco_unitario": product["preco"],
        "imagem_produto": product["imagem"],
    }));
    Ok(Json(json!({ "mensagem": "Produto adicionado ao carrinho" })))
}

async fn remove_line(
    State(state): State<MockState>,
    Path(line_id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.pause(Route::Remove).await;
    let mut inner = state.lock();
    inner.hit(Route::Remove, format!("carrinho/remover/{line_id}"), None, &headers)?;
    let (email, index) = inner
        .find_line(&line_id)
        .ok_or_else(|| not_found("Item não encontrado"))?;
    if let Some(lines) = inner.carts.get_mut(&email) {
        lines.remove(index);
    }
    Ok(Json(json!({ "mensagem": "Item removido" })))
}

async fn update_line(
    State(state): State<MockState>,
    Path(line_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.pause(Route::Update).await;
    let mut inner = state.lock();
    inner.hit(
        Route::Update,
        format!("carrinho/atualizar/{line_id}"),
        Some(body.clone()),
        &headers,
    )?;
    let (email, index) = inner
        .find_line(&line_id)
        .ok_or_else(|| not_found("Item não encontrado"))?;
    if let Some(line) = inner.carts.get_mut(&email).and_then(|lines| lines.get_mut(index)) {
        line["quantidade"] = body["quantidade"].clone();
    }
    Ok(Json(json!({ "mensagem": "Quantidade atualizada" })))
}

async fn clear_cart(
    State(state): State<MockState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.pause(Route::Clear).await;
    let mut inner = state.lock();
    inner.hit(Route::Clear, format!("carrinho/limpar/{email}"), None, &headers)?;
    inner.carts.remove(&email);
    Ok(Json(json!({ "mensagem": "Carrinho limpo" })))
}

async fn list_products(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.pause(Route::Products).await;
    let mut inner = state.lock();
    inner.hit(Route::Products, "produtos".to_owned(), None, &headers)?;
    Ok(Json(json!({ "produtos": inner.products })))
}

async fn register_sale(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.pause(Route::Sales).await;
    let mut inner = state.lock();
    inner.hit(Route::Sales, "vendas".to_owned(), Some(body.clone()), &headers)?;
    let product_id = body["id_produto"].as_i64().unwrap_or_default();
    if let Some(status) = inner.sale_failures.get(&product_id) {
        return Err((*status, Json(json!({ "erro": "Estoque insuficiente" }))));
    }
    inner.sales.push(body);
    Ok(Json(json!({ "mensagem": "Venda registrada" })))
}

/// In-process cart server bound to an ephemeral local port.
///
/// The server task is aborted when the value is dropped.
pub struct MockServer {
    state: MockState,
    url: Url,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Bind to `127.0.0.1:0` and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let state = MockState::default();
        let app = Router::new()
            .route("/carrinho/adicionar", post(add_line))
            .route("/carrinho/remover/{line_id}", delete(remove_line))
            .route("/carrinho/atualizar/{line_id}", put(update_line))
            .route("/carrinho/limpar/{email}", delete(clear_cart))
            .route("/carrinho/{email}", get(get_cart))
            .route("/produtos", get(list_products))
            .route("/vendas", post(register_sale))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let url = Url::parse(&format!("http://{addr}/"))?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { state, url, task })
    }

    /// Base URL of the server.
    #[must_use]
    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// Engine configuration pointing at this server, with short timeouts and
    /// no jitter. Every policy allows three tries.
    #[must_use]
    pub fn config(&self, state_dir: &FsPath) -> SyncConfig {
        let mut config = SyncConfig::new(self.url());
        config.state_dir = state_dir.to_path_buf();
        config.policies = fast_policies();
        config
    }

    /// Add a catalog entry.
    pub fn add_product(&self, id: i64, name: &str, price: f64, image: Option<&str>) {
        self.state.lock().products.push(json!({
            "id_produto": id,
            "nome": name,
            "preco": price,
            "imagem": image,
        }));
    }

    /// Insert a raw cart line for `email`.
    pub fn put_line(&self, email: &str, line: Value) {
        self.state
            .lock()
            .carts
            .entry(email.to_owned())
            .or_default()
            .push(line);
    }

    /// Raw cart lines held for `email`.
    #[must_use]
    pub fn lines(&self, email: &str) -> Vec<Value> {
        self.state.lock().carts.get(email).cloned().unwrap_or_default()
    }

    /// Fail `route` with `status` and `body`, `times` times or until healed.
    pub fn fail(&self, route: Route, status: StatusCode, body: Value, times: Option<u32>) {
        if times == Some(0) {
            return;
        }
        self.state.lock().failures.insert(
            route,
            Failure {
                status,
                body,
                remaining: times,
            },
        );
    }

    /// Stop failing `route`.
    pub fn heal(&self, route: Route) {
        self.state.lock().failures.remove(&route);
    }

    /// Delay every response on `route`.
    pub fn delay(&self, route: Route, delay: Duration) {
        self.state.lock().delays.insert(route, delay);
    }

    /// Reject sales of one product with `status`.
    pub fn fail_sales_for(&self, product_id: i64, status: StatusCode) {
        self.state.lock().sale_failures.insert(product_id, status);
    }

    pub fn heal_sales(&self) {
        self.state.lock().sale_failures.clear();
    }

    /// Sales the server accepted, in order.
    #[must_use]
    pub fn sales(&self) -> Vec<Value> {
        self.state.lock().sales.clone()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    /// Requests received on `route`.
    #[must_use]
    pub fn hits(&self, route: Route) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.route == route)
            .count()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Three tries per call, 2s per try, 5ms base backoff, no jitter.
#[must_use]
pub fn fast_policies() -> RetryPolicies {
    let policy = RetryPolicy::new(3, 2_000, 5).with_jitter(Duration::ZERO);
    RetryPolicies {
        cart_read: policy,
        cart_mutation: policy,
        catalog: policy,
        checkout: policy,
        flush: policy,
    }
}
