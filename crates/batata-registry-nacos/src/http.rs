//! Nacos naming client over the HTTP Open API
//!
//! Talks to `/v1/ns/instance*` endpoints with token authentication and server
//! failover. Ephemeral instances are kept alive by a heartbeat task and
//! subscriptions are served by one polling task per service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use batata_registry_api::{RegistryConfig, RegistryError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::naming::{
    DEFAULT_CLUSTER, DEFAULT_GROUP, EventListener, Instance, ListenerSet, NamingClient,
    NamingEvent, grouped_name, strip_group,
};

const INSTANCE_PATH: &str = "/v1/ns/instance";
const BEAT_PATH: &str = "/v1/ns/instance/beat";
const LIST_PATH: &str = "/v1/ns/instance/list";

/// Heartbeat reply code for an instance the server no longer knows.
const RESOURCE_NOT_FOUND: i64 = 20404;
const BEAT_OK: i64 = 10200;

const DEFAULT_TOKEN_TTL_SECS: u64 = 18000;
/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// Configuration for the HTTP naming client
#[derive(Clone, Debug)]
pub struct NacosHttpConfig {
    /// List of server addresses, including the scheme
    pub server_addrs: Vec<String>,
    /// Context path (e.g., "/nacos")
    pub context_path: String,
    /// Namespace id, empty for the public namespace
    pub namespace: String,
    /// Username for authentication, empty to disable login
    pub username: String,
    pub password: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Heartbeat period for ephemeral instances in milliseconds
    pub beat_interval_ms: u64,
    /// Instance list polling period in milliseconds
    pub subscribe_interval_ms: u64,
    /// Auth endpoint path (default: "/v1/auth/login")
    pub auth_endpoint: String,
}

impl Default for NacosHttpConfig {
    fn default() -> Self {
        Self {
            server_addrs: vec!["http://127.0.0.1:8848".to_string()],
            context_path: "/nacos".to_string(),
            namespace: String::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
            beat_interval_ms: 5000,
            subscribe_interval_ms: 10000,
            auth_endpoint: "/v1/auth/login".to_string(),
        }
    }
}

impl NacosHttpConfig {
    /// Create a new config with a single server address
    pub fn new(server_addr: &str) -> Self {
        Self {
            server_addrs: vec![normalize_addr(server_addr)],
            ..Default::default()
        }
    }

    /// Settings from a registry config: comma separated server list plus
    /// `namespace`, `username`, `password`, `contextPath`, `connectTimeout`,
    /// `readTimeout`, `beatInterval` and `subscribeInterval` properties.
    pub fn from_registry_config(config: &RegistryConfig) -> Result<Self> {
        let server_addrs: Vec<String> = config
            .server_addrs()
            .iter()
            .map(|addr| normalize_addr(addr))
            .collect();
        if server_addrs.is_empty() {
            return Err(RegistryError::Config(
                "nacos server list is empty".to_string(),
            ));
        }

        let defaults = Self::default();
        Ok(Self {
            server_addrs,
            context_path: config.prop_or("contextPath", &defaults.context_path),
            namespace: config.prop_or("namespace", ""),
            username: config.prop_or("username", ""),
            password: config.prop_or("password", ""),
            connect_timeout_ms: config.prop_u64("connectTimeout", defaults.connect_timeout_ms)?,
            read_timeout_ms: config.prop_u64("readTimeout", defaults.read_timeout_ms)?,
            beat_interval_ms: config.prop_u64("beatInterval", defaults.beat_interval_ms)?,
            subscribe_interval_ms: config
                .prop_u64("subscribeInterval", defaults.subscribe_interval_ms)?,
            auth_endpoint: defaults.auth_endpoint,
        })
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Set context path
    pub fn with_context_path(mut self, path: &str) -> Self {
        self.context_path = path.to_string();
        self
    }

    /// Set heartbeat and polling periods
    pub fn with_intervals(mut self, beat_ms: u64, subscribe_ms: u64) -> Self {
        self.beat_interval_ms = beat_ms;
        self.subscribe_interval_ms = subscribe_ms;
        self
    }

    fn auth_enabled(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Prefix bare `host:port` addresses with `http://`.
fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Token info for authentication
#[derive(Clone, Debug)]
struct TokenInfo {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServiceInfo {
    name: String,
    hosts: Vec<Instance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BeatResponse {
    code: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeatInfo<'a> {
    service_name: String,
    ip: &'a str,
    port: u16,
    weight: f64,
    cluster: &'a str,
    metadata: &'a HashMap<String, String>,
    scheduled: bool,
    period: u64,
    stopped: bool,
}

/// Shared by the client and its background tasks.
struct HttpInner {
    client: Client,
    config: NacosHttpConfig,
    current_server_index: RwLock<usize>,
    token: RwLock<Option<TokenInfo>>,
}

impl HttpInner {
    /// Get the current server URL
    fn current_server(&self) -> String {
        let index = *self.current_server_index.read();
        self.config.server_addrs[index % self.config.server_addrs.len()].clone()
    }

    /// Switch to the next server (for failover)
    fn switch_to_next_server(&self) {
        let mut index = self.current_server_index.write();
        *index = (*index + 1) % self.config.server_addrs.len();
        debug!("Switched to server index: {}", *index);
    }

    /// Build full URL with context path
    fn build_url(&self, path: &str) -> String {
        let base_url = self.current_server();
        let context_path = self.config.context_path.trim_matches('/');

        if context_path.is_empty() {
            format!("{}{}", base_url, path)
        } else {
            format!("{}/{}{}", base_url, context_path, path)
        }
    }

    /// Get the current access token unless it is about to expire
    fn get_token(&self) -> Option<String> {
        self.token.read().as_ref().and_then(|t| {
            if t.expires_at > Instant::now() + TOKEN_REFRESH_WINDOW {
                Some(t.access_token.clone())
            } else {
                None
            }
        })
    }

    fn clear_token(&self) {
        *self.token.write() = None;
    }

    fn set_token(&self, access_token: String, ttl_seconds: u64) {
        *self.token.write() = Some(TokenInfo {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        });
    }

    /// Authenticate with the server
    async fn authenticate(&self) -> anyhow::Result<()> {
        let url = self.build_url(&self.config.auth_endpoint);

        debug!("Authenticating with server: {}", url);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", &self.config.username),
                ("password", &self.config.password),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            let result: serde_json::Value = response.json().await?;

            if let Some(access_token) = result.get("accessToken").and_then(|v| v.as_str()) {
                let ttl = result
                    .get("tokenTtl")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

                self.set_token(access_token.to_string(), ttl);
                debug!(
                    "Authentication successful, token expires in {} seconds",
                    ttl
                );
                return Ok(());
            }
        }

        Err(anyhow::anyhow!("Authentication failed"))
    }

    /// Valid token when login is configured, refreshing if needed
    async fn ensure_token(&self) -> anyhow::Result<Option<String>> {
        if !self.config.auth_enabled() {
            return Ok(None);
        }
        if let Some(token) = self.get_token() {
            return Ok(Some(token));
        }

        self.authenticate().await?;

        self.get_token()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Failed to get token after authentication"))
    }

    /// Send a request with query parameters, failing over across servers.
    /// Returns the response body of the first successful reply.
    ///
    /// A rejected token is dropped and the request retried once with a
    /// fresh login.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<String> {
        let mut attempts = self.config.server_addrs.len();
        let mut relogin = self.config.auth_enabled();
        let mut last_error = None;

        while attempts > 0 {
            attempts -= 1;
            let token = match self.ensure_token().await {
                Ok(token) => token,
                Err(e) => {
                    warn!("Login failed: {:#}, switching to next server", e);
                    self.switch_to_next_server();
                    last_error = Some(e);
                    continue;
                }
            };

            let url = self.build_url(path);
            let mut query = params.to_vec();
            if !self.config.namespace.is_empty() {
                query.push(("namespaceId", self.config.namespace.clone()));
            }
            if let Some(token) = token {
                query.push(("accessToken", token));
            }

            match self
                .client
                .request(method.clone(), &url)
                .query(&query)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if self.config.auth_enabled()
                        && (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN)
                    {
                        warn!("Token rejected, re-authenticating...");
                        self.clear_token();
                        last_error =
                            Some(anyhow::anyhow!("Request rejected with status {}", status));
                        if relogin {
                            relogin = false;
                            attempts += 1;
                        }
                        continue;
                    }

                    let body = response.text().await?;
                    if status.is_success() {
                        return Ok(body);
                    }
                    error!("Request failed with status {}: {}", status, body);
                    return Err(anyhow::anyhow!(
                        "Request failed with status {}: {}",
                        status,
                        body
                    ));
                }
                Err(e) => {
                    warn!("Request failed: {}, switching to next server", e);
                    self.switch_to_next_server();
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All servers failed")))
    }

    async fn register(&self, service_name: &str, instance: &Instance) -> anyhow::Result<()> {
        let params = [
            ("serviceName", grouped_name(service_name, DEFAULT_GROUP)),
            ("groupName", DEFAULT_GROUP.to_string()),
            ("ip", instance.ip.clone()),
            ("port", instance.port.to_string()),
            ("weight", instance.weight.to_string()),
            ("enable", instance.enabled.to_string()),
            ("healthy", instance.healthy.to_string()),
            ("ephemeral", instance.ephemeral.to_string()),
            ("clusterName", cluster_of(instance).to_string()),
            ("metadata", serde_json::to_string(&instance.metadata)?),
        ];
        self.request(Method::POST, INSTANCE_PATH, &params).await?;
        info!(
            "Registered instance {}:{} to {}",
            instance.ip, instance.port, service_name
        );
        Ok(())
    }

    async fn deregister(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
        ephemeral: bool,
    ) -> anyhow::Result<()> {
        let params = [
            ("serviceName", grouped_name(service_name, DEFAULT_GROUP)),
            ("groupName", DEFAULT_GROUP.to_string()),
            ("ip", ip.to_string()),
            ("port", port.to_string()),
            ("ephemeral", ephemeral.to_string()),
            ("clusterName", DEFAULT_CLUSTER.to_string()),
        ];
        self.request(Method::DELETE, INSTANCE_PATH, &params).await?;
        info!("Deregistered instance {}:{} from {}", ip, port, service_name);
        Ok(())
    }

    /// Send one heartbeat and return the server's reply code.
    async fn send_beat(&self, service_name: &str, instance: &Instance) -> anyhow::Result<i64> {
        let grouped = grouped_name(service_name, DEFAULT_GROUP);
        let beat = BeatInfo {
            service_name: grouped.clone(),
            ip: &instance.ip,
            port: instance.port,
            weight: instance.weight,
            cluster: cluster_of(instance),
            metadata: &instance.metadata,
            scheduled: false,
            period: self.config.beat_interval_ms,
            stopped: false,
        };
        let params = [
            ("serviceName", grouped),
            ("groupName", DEFAULT_GROUP.to_string()),
            ("ip", instance.ip.clone()),
            ("port", instance.port.to_string()),
            ("beat", serde_json::to_string(&beat)?),
        ];
        let body = self.request(Method::PUT, BEAT_PATH, &params).await?;
        Ok(parse_beat_code(&body))
    }

    /// Current instances of `service_name`, ordered by instance key.
    async fn list_instances(&self, service_name: &str) -> anyhow::Result<Vec<Instance>> {
        let params = [
            ("serviceName", grouped_name(service_name, DEFAULT_GROUP)),
            ("groupName", DEFAULT_GROUP.to_string()),
            ("healthyOnly", "false".to_string()),
        ];
        let body = self.request(Method::GET, LIST_PATH, &params).await?;
        parse_service_info(service_name, &body)
    }
}

fn cluster_of(instance: &Instance) -> &str {
    if instance.cluster_name.is_empty() {
        DEFAULT_CLUSTER
    } else {
        &instance.cluster_name
    }
}

/// Older servers answer a heartbeat with plain `ok`.
fn parse_beat_code(body: &str) -> i64 {
    serde_json::from_str::<BeatResponse>(body)
        .map(|r| r.code)
        .unwrap_or(BEAT_OK)
}

fn parse_service_info(service_name: &str, body: &str) -> anyhow::Result<Vec<Instance>> {
    let info: ServiceInfo = serde_json::from_str(body)?;
    if !info.name.is_empty() && strip_group(&info.name) != service_name {
        warn!(
            "Instance list for {} answered with service {}",
            service_name, info.name
        );
    }

    let mut hosts = info.hosts;
    for host in &mut hosts {
        let name = strip_group(&host.service_name);
        host.service_name = if name.is_empty() {
            service_name.to_string()
        } else {
            name.to_string()
        };
    }
    hosts.sort_by_key(Instance::key);
    Ok(hosts)
}

fn backend_error(e: anyhow::Error) -> RegistryError {
    RegistryError::Backend(format!("{:#}", e))
}

/// Naming client for Nacos servers over HTTP.
pub struct NacosHttpNamingClient {
    inner: Arc<HttpInner>,
    listeners: Arc<ListenerSet>,
    /// key = service#ip#port
    beats: DashMap<String, JoinHandle<()>>,
    /// key = service name
    pollers: DashMap<String, JoinHandle<()>>,
}

impl NacosHttpNamingClient {
    /// Create a client. Login happens lazily on the first request.
    pub fn new(config: NacosHttpConfig) -> anyhow::Result<Self> {
        if config.server_addrs.is_empty() {
            return Err(anyhow::anyhow!("No nacos server address configured"));
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpInner {
                client,
                config,
                current_server_index: RwLock::new(0),
                token: RwLock::new(None),
            }),
            listeners: Arc::new(ListenerSet::new()),
            beats: DashMap::new(),
            pollers: DashMap::new(),
        })
    }

    pub fn config(&self) -> &NacosHttpConfig {
        &self.inner.config
    }

    /// Whether a heartbeat task runs for the instance.
    pub fn has_beat(&self, service_name: &str, ip: &str, port: u16) -> bool {
        self.beats.contains_key(&beat_key(service_name, ip, port))
    }

    /// Whether `service_name` is being polled for changes.
    pub fn is_polling(&self, service_name: &str) -> bool {
        self.pollers.contains_key(service_name)
    }

    fn start_beat(&self, service_name: &str, instance: Instance) {
        let key = beat_key(service_name, &instance.ip, instance.port);
        let inner = self.inner.clone();
        let service = service_name.to_string();

        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(inner.config.beat_interval_ms);
            loop {
                tokio::time::sleep(period).await;
                match inner.send_beat(&service, &instance).await {
                    Ok(RESOURCE_NOT_FOUND) => {
                        warn!(
                            "Instance {}:{} of {} unknown to server, registering again",
                            instance.ip, instance.port, service
                        );
                        if let Err(e) = inner.register(&service, &instance).await {
                            warn!("Re-registration of {} failed: {:#}", service, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Heartbeat for {} failed: {:#}", service, e),
                }
            }
        });

        if let Some(previous) = self.beats.insert(key, handle) {
            previous.abort();
        }
    }

    fn stop_beat(&self, service_name: &str, ip: &str, port: u16) {
        if let Some((_, handle)) = self.beats.remove(&beat_key(service_name, ip, port)) {
            handle.abort();
        }
    }

    fn spawn_poller(&self, service_name: &str) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let listeners = self.listeners.clone();
        let service = service_name.to_string();

        tokio::spawn(async move {
            let period = Duration::from_millis(inner.config.subscribe_interval_ms);
            let mut last: Vec<Instance> = Vec::new();
            loop {
                match inner.list_instances(&service).await {
                    Ok(instances) if instances != last => {
                        debug!(
                            "Instances of {} changed: {} -> {}",
                            service,
                            last.len(),
                            instances.len()
                        );
                        listeners.publish(&NamingEvent {
                            service_name: service.clone(),
                            instances: instances.clone(),
                        });
                        last = instances;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling instances of {} failed: {:#}", service, e),
                }
                tokio::time::sleep(period).await;
            }
        })
    }
}

fn beat_key(service_name: &str, ip: &str, port: u16) -> String {
    format!("{}#{}#{}", service_name, ip, port)
}

#[async_trait]
impl NamingClient for NacosHttpNamingClient {
    async fn register_instance(&self, service_name: &str, mut instance: Instance) -> Result<()> {
        instance.service_name = service_name.to_string();
        self.inner
            .register(service_name, &instance)
            .await
            .map_err(backend_error)?;
        if instance.ephemeral {
            self.start_beat(service_name, instance);
        }
        Ok(())
    }

    async fn deregister_instance(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
        ephemeral: bool,
    ) -> Result<()> {
        self.stop_beat(service_name, ip, port);
        self.inner
            .deregister(service_name, ip, port, ephemeral)
            .await
            .map_err(backend_error)
    }

    async fn subscribe(&self, service_name: &str, listener: Arc<dyn EventListener>) -> Result<()> {
        self.listeners.add(service_name, listener);
        if let Entry::Vacant(entry) = self.pollers.entry(service_name.to_string()) {
            debug!("Start polling instances of {}", service_name);
            entry.insert(self.spawn_poller(service_name));
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        service_name: &str,
        listener: &Arc<dyn EventListener>,
    ) -> Result<()> {
        if self.listeners.remove(service_name, listener) == 0 {
            if let Some((_, handle)) = self.pollers.remove(service_name) {
                debug!("Stop polling instances of {}", service_name);
                handle.abort();
            }
        }
        Ok(())
    }
}

impl Drop for NacosHttpNamingClient {
    fn drop(&mut self) {
        for entry in self.beats.iter() {
            entry.value().abort();
        }
        for entry in self.pollers.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::FnEventListener;

    fn unreachable_config() -> NacosHttpConfig {
        NacosHttpConfig::new("127.0.0.1:1")
            .with_timeouts(200, 500)
            .with_intervals(60_000, 60_000)
    }

    #[test]
    fn test_config_default() {
        let config = NacosHttpConfig::default();
        assert_eq!(config.server_addrs, vec!["http://127.0.0.1:8848".to_string()]);
        assert_eq!(config.context_path, "/nacos");
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.beat_interval_ms, 5000);
        assert_eq!(config.subscribe_interval_ms, 10000);
        assert!(!config.auth_enabled());
    }

    #[test]
    fn test_config_from_registry_config() {
        let registry_config =
            RegistryConfig::new("nacos", "127.0.0.1:8848, https://nacos.example.com/")
                .with_prop("namespace", "dev")
                .with_prop("username", "nacos")
                .with_prop("password", "secret")
                .with_prop("beatInterval", "3000")
                .with_prop("contextPath", "/");

        let config = NacosHttpConfig::from_registry_config(&registry_config).unwrap();
        assert_eq!(
            config.server_addrs,
            vec![
                "http://127.0.0.1:8848".to_string(),
                "https://nacos.example.com".to_string()
            ]
        );
        assert_eq!(config.namespace, "dev");
        assert!(config.auth_enabled());
        assert_eq!(config.beat_interval_ms, 3000);
        assert_eq!(config.read_timeout_ms, 30000);
        assert_eq!(config.context_path, "/");
    }

    #[test]
    fn test_config_rejects_empty_server_list() {
        let registry_config = RegistryConfig::new("nacos", " , ");
        assert!(matches!(
            NacosHttpConfig::from_registry_config(&registry_config),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn test_build_url() {
        let client = NacosHttpNamingClient::new(NacosHttpConfig::new("localhost:8848")).unwrap();
        assert_eq!(
            client.inner.build_url(INSTANCE_PATH),
            "http://localhost:8848/nacos/v1/ns/instance"
        );

        let config = NacosHttpConfig::new("http://localhost:8848").with_context_path("");
        let client = NacosHttpNamingClient::new(config).unwrap();
        assert_eq!(
            client.inner.build_url(LIST_PATH),
            "http://localhost:8848/v1/ns/instance/list"
        );
    }

    #[test]
    fn test_failover_cycles_servers() {
        let config = NacosHttpConfig {
            server_addrs: vec!["http://a:1".to_string(), "http://b:1".to_string()],
            ..Default::default()
        };
        let client = NacosHttpNamingClient::new(config).unwrap();
        assert_eq!(client.inner.current_server(), "http://a:1");
        client.inner.switch_to_next_server();
        assert_eq!(client.inner.current_server(), "http://b:1");
        client.inner.switch_to_next_server();
        assert_eq!(client.inner.current_server(), "http://a:1");
    }

    #[test]
    fn test_token_refreshed_before_expiry() {
        let client = NacosHttpNamingClient::new(unreachable_config()).unwrap();
        assert!(client.inner.get_token().is_none());

        client.inner.set_token("fresh".to_string(), 3600);
        assert_eq!(client.inner.get_token().as_deref(), Some("fresh"));

        client.inner.set_token("stale".to_string(), 100);
        assert!(client.inner.get_token().is_none());
    }

    #[test]
    fn test_parse_service_info_normalizes_names() {
        let body = r#"{"name":"DEFAULT_GROUP@@svc","hosts":[
            {"ip":"10.0.0.2","port":80,"serviceName":"DEFAULT_GROUP@@svc","clusterName":"DEFAULT"},
            {"ip":"10.0.0.1","port":80,"serviceName":"","clusterName":"DEFAULT",
             "metadata":{"k":"v"}}]}"#;
        let hosts = parse_service_info("svc", body).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].ip, "10.0.0.1");
        assert!(hosts.iter().all(|h| h.service_name == "svc"));
        assert_eq!(hosts[0].metadata.get("k").map(String::as_str), Some("v"));

        assert!(parse_service_info("svc", "not json").is_err());
    }

    #[test]
    fn test_parse_beat_code() {
        assert_eq!(
            parse_beat_code(r#"{"clientBeatInterval":5000,"code":20404}"#),
            RESOURCE_NOT_FOUND
        );
        assert_eq!(parse_beat_code(r#"{"code":10200}"#), BEAT_OK);
        assert_eq!(parse_beat_code("ok"), BEAT_OK);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_error() {
        let client = NacosHttpNamingClient::new(unreachable_config()).unwrap();
        let err = client
            .register_instance("svc", Instance::new("10.0.0.1", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Backend(_)));
        assert!(!client.has_beat("svc", "10.0.0.1", 80));
    }

    #[tokio::test]
    async fn test_poller_follows_listeners() {
        let client = NacosHttpNamingClient::new(unreachable_config()).unwrap();
        let first: Arc<dyn EventListener> = Arc::new(FnEventListener::new(|_| {}));
        let second: Arc<dyn EventListener> = Arc::new(FnEventListener::new(|_| {}));

        client.subscribe("svc", first.clone()).await.unwrap();
        client.subscribe("svc", second.clone()).await.unwrap();
        assert!(client.is_polling("svc"));

        client.unsubscribe("svc", &first).await.unwrap();
        assert!(client.is_polling("svc"));
        client.unsubscribe("svc", &second).await.unwrap();
        assert!(!client.is_polling("svc"));
    }
}
