#![allow(dead_code)]

use axum::extract::ConnectInfo;
use axum::{Router, middleware, routing::get};
use axum_test::TestServer;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Layer;

use link_router::analytics::{AggregatorRegistry, AggregatorSettings};
use link_router::api::handlers::{health_handler, redirect_handler};
use link_router::api::middleware::{auth, rate_limit};
use link_router::api::routes::protected_routes;
use link_router::application::services::AuthService;
use link_router::domain::entities::{GeoRule, Link, LinkStatus};
use link_router::domain::repositories::{GeoRuleRepository, LinkRepository};
use link_router::evaluation::{EvaluationQueue, QueueSettings, QueueWorker};
use link_router::infrastructure::Repositories;
use link_router::infrastructure::cache::NullCache;
use link_router::state::{AppState, RequestSettings};

pub const TEST_TOKEN: &str = "test-api-token";
pub const TEST_SECRET: &str = "test-signing-secret";

/// Everything a test needs to arrange data and inspect side effects.
///
/// The queue worker is never started, so enqueued jobs stay visible
/// through [`EvaluationQueue::depth`].
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub repositories: Repositories,
    pub aggregators: Arc<AggregatorRegistry>,
    _worker: QueueWorker,
}

pub fn create_test_state(settings: RequestSettings) -> (AppState, Repositories, QueueWorker) {
    let repositories = Repositories::in_memory();
    let (queue, worker) = EvaluationQueue::new(QueueSettings {
        capacity: 64,
        ..QueueSettings::default()
    });
    let aggregators = Arc::new(AggregatorRegistry::new(
        repositories.aggregates.clone(),
        repositories.links.clone(),
        AggregatorSettings::default(),
    ));
    let auth_service = AuthService::new(TEST_TOKEN, TEST_SECRET.to_string()).unwrap();

    let state = AppState::new(
        &repositories,
        Arc::new(NullCache::new()),
        queue,
        aggregators,
        auth_service,
        settings,
    );

    (state, repositories, worker)
}

pub fn create_test_router(state: AppState) -> Router {
    let api = protected_routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::layer))
        .layer(rate_limit::api_layer(false).unwrap());

    Router::new()
        .route("/health", get(health_handler))
        .route("/{code}", get(redirect_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(MockConnectInfoLayer)
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(RequestSettings::default())
}

pub fn create_test_app_with(settings: RequestSettings) -> TestApp {
    let (state, repositories, worker) = create_test_state(settings);
    let server = TestServer::new(create_test_router(state.clone())).unwrap();

    TestApp {
        server,
        aggregators: state.aggregators.clone(),
        state,
        repositories,
        _worker: worker,
    }
}

pub fn test_link(id: i64, code: &str, default_destination: &str) -> Link {
    Link::new(
        id,
        code.to_string(),
        7,
        Utc::now(),
        default_destination.to_string(),
        LinkStatus::Active,
    )
}

pub async fn create_test_link(
    repositories: &Repositories,
    link: Link,
    rules: Vec<GeoRule>,
) {
    let link_id = link.id;
    repositories.links.upsert(link).await.unwrap();
    repositories
        .geo_rules
        .replace_for_link(link_id, rules)
        .await
        .unwrap();
}

pub fn bearer() -> String {
    format!("Bearer {}", TEST_TOKEN)
}

#[derive(Clone)]
pub struct MockConnectInfoLayer;

impl<S> Layer<S> for MockConnectInfoLayer {
    type Service = MockConnectInfoService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MockConnectInfoService { inner }
    }
}

#[derive(Clone)]
pub struct MockConnectInfoService<S> {
    inner: S,
}

impl<S, B> tower::Service<axum::http::Request<B>> for MockConnectInfoService<S>
where
    S: tower::Service<axum::http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        self.inner.call(req)
    }
}
