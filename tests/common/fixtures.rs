//! Splash endpoint mock and run fixtures

use std::sync::Arc;
use std::time::Duration;
use transistor::scraper::{ScraperFactory, SplashScraperFactory};
use transistor::session::HttpTransport;
use transistor::{Event, ManagerConfig, SessionConfig, SessionRetryConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Renders a page naming the requested keyword, like a Splash `execute` call would
pub struct EchoRender;

impl Respond for EchoRender {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let payload: serde_json::Value = request.body_json().unwrap_or_default();
        let keyword = payload["keyword"].as_str().unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "html": format!("<html><h1>{keyword}</h1></html>"),
            "url": payload["url"],
            "http_status": 200,
            "headers": [
                {"name": "Content-Type", "value": "text/html"},
                {"name": "X-Crawlera-Session", "value": "1234"}
            ],
            "cookies": [{"name": "sid", "value": "abc"}]
        }))
    }
}

/// Mock Splash server answering every `/execute` POST
pub async fn splash_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(EchoRender)
        .mount(&server)
        .await;
    server
}

/// Retry policy with millisecond backoff
pub fn fast_retry() -> SessionRetryConfig {
    SessionRetryConfig {
        max_retries: 5,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        retry_local_timeout: false,
    }
}

/// Scraper factory rendering through `server`
pub fn splash_factory(server: &MockServer, site: &str) -> Arc<dyn ScraperFactory> {
    let config = SessionConfig {
        endpoint: format!("{}/execute", server.uri()),
        ..Default::default()
    };
    let transport = HttpTransport::new(&config).expect("valid endpoint");
    Arc::new(
        SplashScraperFactory::new(Arc::new(transport), fast_retry())
            .searchurl(format!("https://{site}/search?q={{task}}")),
    )
}

/// Manager settings with a short pop timeout
pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        pop_timeout: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Every event still buffered in `events`
pub fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}
