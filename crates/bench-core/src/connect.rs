use anyhow::Context;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::service::{
    HttpJsonService, MockBehavior, MockService, ReviewService, ServiceCall, ServiceError,
};

pub const DEFAULT_SERVICE_PORT: u16 = 8080;

/// One network-addressable review service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid port in endpoint '{s}'"))?;
                (host, port)
            }
            None => (s, DEFAULT_SERVICE_PORT),
        };
        if host.is_empty() {
            anyhow::bail!("endpoint '{s}' has an empty host");
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Exponential backoff bounds for connection retries: the delay starts at
/// `base` and doubles after each failure up to `ceiling`.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    pub base: Duration,
    pub ceiling: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl RetryBackoff {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.ceiling)
    }
}

/// Establishes a session with a single endpoint. Implementations decide
/// what "connected" means for their transport.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ServiceCall<'a, Arc<dyn ReviewService>>;
}

/// Retries one endpoint until it connects. No attempt limit and no
/// timeout; only process termination aborts this.
pub async fn connect_one_with_retry(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    backoff: RetryBackoff,
) -> Arc<dyn ReviewService> {
    let mut delay = backoff.base;
    loop {
        match connector.connect(endpoint).await {
            Ok(session) => {
                info!("Connected to review service at {endpoint}");
                return session;
            }
            Err(e) => {
                warn!(
                    "Connection to {endpoint} failed ({e}) - retrying in {} second(s)",
                    delay.as_secs()
                );
                sleep(delay).await;
                delay = backoff.next_delay(delay);
            }
        }
    }
}

/// Connects every endpoint in parallel, each retrying independently.
/// Returns only once all of them have a live session; never partial.
pub async fn connect_all(
    connector: Arc<dyn Connector>,
    endpoints: &[Endpoint],
    backoff: RetryBackoff,
) -> anyhow::Result<SessionPool> {
    info!("Connecting to {} review service endpoint(s)...", endpoints.len());

    let mut handles = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let connector = connector.clone();
        let endpoint = endpoint.clone();
        handles.push(tokio::spawn(async move {
            connect_one_with_retry(connector.as_ref(), &endpoint, backoff).await
        }));
    }

    let mut sessions = Vec::with_capacity(handles.len());
    for handle in handles {
        sessions.push(handle.await?);
    }
    Ok(SessionPool::new(sessions))
}

/// Established sessions, handed out to workers round-robin.
pub struct SessionPool {
    sessions: Vec<Arc<dyn ReviewService>>,
    cursor: AtomicUsize,
}

impl SessionPool {
    pub fn new(sessions: Vec<Arc<dyn ReviewService>>) -> Self {
        Self {
            sessions,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn next_session(&self) -> Arc<dyn ReviewService> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.sessions[idx % self.sessions.len()].clone()
    }

    pub fn first(&self) -> Arc<dyn ReviewService> {
        self.sessions[0].clone()
    }
}

/// Connects over HTTP: an endpoint is live once its health probe answers.
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

impl Connector for HttpConnector {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ServiceCall<'a, Arc<dyn ReviewService>> {
        Box::pin(async move {
            let url = format!("http://{}:{}/health", endpoint.host, endpoint.port);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(ServiceError::Protocol(format!(
                    "health check returned status {}",
                    response.status()
                )));
            }
            Ok(Arc::new(HttpJsonService::new(
                self.client.clone(),
                &endpoint.host,
                endpoint.port,
            )) as Arc<dyn ReviewService>)
        })
    }
}

/// Hands every endpoint the same in-memory service, so a multi-endpoint
/// mock run still has one consistent view of the book table.
pub struct MockConnector {
    service: Arc<MockService>,
}

impl MockConnector {
    pub fn new(behavior: MockBehavior, delay: Duration) -> Self {
        Self {
            service: Arc::new(MockService::new(behavior, delay)),
        }
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> ServiceCall<'a, Arc<dyn ReviewService>> {
        Box::pin(async move { Ok(self.service.clone() as Arc<dyn ReviewService>) })
    }
}
