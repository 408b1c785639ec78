use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use finsync_core::FinsyncClient;
use tracing::debug;

/// Answers "can we reach the remote service right now?".
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> impl Future<Output = bool> + Send;
}

impl<P: ConnectivityProbe> ConnectivityProbe for Arc<P> {
    fn is_online(&self) -> impl Future<Output = bool> + Send {
        (**self).is_online()
    }
}

/// Connectivity switched by hand: simulated offline mode and tests.
#[derive(Debug)]
pub struct ManualProbe {
    online: AtomicBool,
}

impl ManualProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for ManualProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Pings the data API; any failure, including a timeout, counts as offline.
#[derive(Clone)]
pub struct HttpProbe {
    client: FinsyncClient,
}

impl HttpProbe {
    pub fn new(client: FinsyncClient) -> Self {
        Self { client }
    }
}

impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.ping().await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn manual_probe_follows_switch() {
        let probe = Arc::new(ManualProbe::new(true));
        assert!(probe.is_online().await);
        probe.set_online(false);
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn http_probe_reports_reachable_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = FinsyncClient::new(&server.uri(), "key").unwrap();
        assert!(HttpProbe::new(client).is_online().await);
    }

    #[tokio::test]
    async fn http_probe_treats_errors_and_timeouts_as_offline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = FinsyncClient::new(&server.uri(), "key")
            .unwrap()
            .with_timeout(Duration::from_millis(50))
            .unwrap();
        assert!(!HttpProbe::new(client).is_online().await);

        let unreachable = FinsyncClient::new("http://127.0.0.1:9", "key").unwrap();
        assert!(!HttpProbe::new(unreachable).is_online().await);
    }
}
