//! Proxies over their HTTP admin API.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use topom_core::{Proxy, ProxyModel, ProxyStats, SentinelModel, Slot};

use crate::cluster::ProxyClient;

/// Per-proxy capability token: `sha256("Proxy-XAuth-[name]-[auth]-[token]")`, 32 hex chars.
#[must_use]
pub fn proxy_xauth(product_name: &str, product_auth: &str, token: &str) -> String {
    let digest = Sha256::digest(format!(
        "Proxy-XAuth-[{product_name}]-[{product_auth}]-[{token}]"
    ));
    let mut xauth = hex::encode(digest);
    xauth.truncate(32);
    xauth
}

#[derive(Debug, Clone)]
pub struct HttpProxyClient {
    http: reqwest::Client,
    product_name: String,
    product_auth: String,
}

impl HttpProxyClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        product_name: impl Into<String>,
        product_auth: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build proxy http client")?;
        Ok(Self {
            http,
            product_name: product_name.into(),
            product_auth: product_auth.into(),
        })
    }

    fn url(&self, proxy: &Proxy, action: &str) -> String {
        let xauth = proxy_xauth(&self.product_name, &self.product_auth, &proxy.token);
        format!("http://{}/api/proxy/{action}/{xauth}", proxy.admin_addr)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn put<B: Serialize + ?Sized>(&self, url: &str, body: Option<&B>) -> anyhow::Result<()> {
        let mut req = self.http.put(url);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .with_context(|| format!("PUT {url}"))?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ProxyClient for HttpProxyClient {
    async fn model(&self, admin_addr: &str) -> anyhow::Result<ProxyModel> {
        let mut model: ProxyModel = self
            .get(&format!("http://{admin_addr}/api/proxy/model"))
            .await?;
        if model.admin_addr.is_empty() {
            model.admin_addr = admin_addr.to_string();
        }
        Ok(model)
    }

    async fn xping(&self, proxy: &Proxy) -> anyhow::Result<()> {
        let url = self.url(proxy, "xping");
        self.http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn fill_slots(&self, proxy: &Proxy, slots: &[Slot]) -> anyhow::Result<()> {
        self.put(&self.url(proxy, "fillslots"), Some(slots)).await
    }

    async fn start(&self, proxy: &Proxy) -> anyhow::Result<()> {
        self.put::<()>(&self.url(proxy, "start"), None).await
    }

    async fn shutdown(&self, proxy: &Proxy) -> anyhow::Result<()> {
        self.put::<()>(&self.url(proxy, "shutdown"), None).await
    }

    async fn set_sentinels(&self, proxy: &Proxy, sentinel: &SentinelModel) -> anyhow::Result<()> {
        self.put(&self.url(proxy, "sentinels"), Some(sentinel)).await
    }

    async fn stats(&self, proxy: &Proxy) -> anyhow::Result<ProxyStats> {
        self.get(&self.url(proxy, "stats")).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeProxy {
        filled: Arc<Mutex<Vec<u32>>>,
        started: Arc<Mutex<bool>>,
    }

    fn expected_xauth() -> String {
        proxy_xauth("demo", "secret", "tok-1")
    }

    async fn spawn_fake(fake: FakeProxy) -> String {
        let app = Router::new()
            .route(
                "/api/proxy/model",
                get(|| async {
                    Json(ProxyModel {
                        token: "tok-1".to_string(),
                        proxy_addr: "10.0.0.9:19000".to_string(),
                        ..ProxyModel::default()
                    })
                }),
            )
            .route(
                "/api/proxy/stats/{xauth}",
                get(|Path(xauth): Path<String>| async move {
                    if xauth != expected_xauth() {
                        return Err(StatusCode::FORBIDDEN);
                    }
                    Ok(Json(ProxyStats {
                        online: true,
                        ops_total: 42,
                        ..ProxyStats::default()
                    }))
                }),
            )
            .route(
                "/api/proxy/fillslots/{xauth}",
                put(
                    |State(fake): State<FakeProxy>, Json(slots): Json<Vec<Slot>>| async move {
                        fake.filled.lock().extend(slots.iter().map(|s| s.id));
                        StatusCode::OK
                    },
                ),
            )
            .route(
                "/api/proxy/start/{xauth}",
                put(|State(fake): State<FakeProxy>| async move {
                    *fake.started.lock() = true;
                    StatusCode::OK
                }),
            )
            .route(
                "/api/proxy/shutdown/{xauth}",
                put(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn proxy_at(admin_addr: &str, token: &str) -> Proxy {
        Proxy {
            id: 1,
            token: token.to_string(),
            admin_addr: admin_addr.to_string(),
            proxy_addr: String::new(),
            datacenter: String::new(),
            start_time: String::new(),
        }
    }

    fn client() -> HttpProxyClient {
        HttpProxyClient::new("demo", "secret", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn proxy_xauth_depends_on_token() {
        let a = proxy_xauth("demo", "secret", "tok-1");
        assert_eq!(a.len(), 32);
        assert_eq!(a, proxy_xauth("demo", "secret", "tok-1"));
        assert_ne!(a, proxy_xauth("demo", "secret", "tok-2"));
    }

    #[tokio::test]
    async fn model_fills_in_admin_addr() {
        let addr = spawn_fake(FakeProxy::default()).await;
        let model = client().model(&addr).await.unwrap();
        assert_eq!(model.token, "tok-1");
        assert_eq!(model.admin_addr, addr);
    }

    #[tokio::test]
    async fn commands_reach_the_proxy() {
        let fake = FakeProxy::default();
        let addr = spawn_fake(fake.clone()).await;
        let proxy = proxy_at(&addr, "tok-1");
        let client = client();

        let slots = vec![Slot {
            id: 5,
            ..Slot::default()
        }];
        client.fill_slots(&proxy, &slots).await.unwrap();
        client.start(&proxy).await.unwrap();

        assert_eq!(*fake.filled.lock(), vec![5]);
        assert!(*fake.started.lock());
        assert_eq!(client.stats(&proxy).await.unwrap().ops_total, 42);
    }

    #[tokio::test]
    async fn error_statuses_become_errors() {
        let addr = spawn_fake(FakeProxy::default()).await;
        let client = client();

        assert!(client.shutdown(&proxy_at(&addr, "tok-1")).await.is_err());
        // wrong token, wrong xauth
        assert!(client.stats(&proxy_at(&addr, "tok-2")).await.is_err());
    }
}
