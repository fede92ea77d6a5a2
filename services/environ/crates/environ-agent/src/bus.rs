//! Valkey pub/sub transport: subscribe to this node's event pattern, hand
//! each message to the [`Inbox`] and publish the replies.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use fred::clients::SubscriberClient;
use fred::prelude::*;
use fred::types::config::{TlsConfig, TlsConnector, TlsHostMapping};
use tokio::sync::broadcast::error::RecvError;

use environ_common::{AgentConfig, Envelope, Metadata, Reply, ReplyEnvelope, event_from_channel};

use crate::dispatcher::Dispatcher;
use crate::error::BusError;
use crate::exec::CommandRunner;
use crate::fs::FileSystem;
use crate::inbox::{Inbox, Request};

/// Messages the subscriber buffers before a slow reader starts losing them.
const MESSAGE_CAPACITY: usize = 4096;

/// Connection pair: one client in subscriber mode, one for replies.
pub struct ValkeyBus {
    subscriber: SubscriberClient,
    publisher: Client,
    pattern: String,
}

impl std::fmt::Debug for ValkeyBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyBus")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl ValkeyBus {
    /// Connect both clients and verify the server answers PING.
    pub async fn connect(config: &AgentConfig, password: Option<String>) -> Result<Self> {
        let mut fred_config = Config::from_url(&config.cortex_redis)
            .with_context(|| format!("invalid Valkey URL: {}", config.cortex_redis))?;
        if let Some(tls_config) = tls_client_config(config)? {
            fred_config.tls = Some(TlsConfig {
                connector: TlsConnector::Rustls(Arc::new(tls_config).into()),
                hostnames: TlsHostMapping::None,
            });
        }
        if config.valkey_user.is_some() {
            fred_config.username.clone_from(&config.valkey_user);
        }
        if password.is_some() {
            fred_config.password = password;
        }

        let builder = || {
            let mut builder = Builder::from_config(fred_config.clone());
            builder
                .with_connection_config(|conn_config| {
                    conn_config.connection_timeout = Duration::from_secs(5);
                    conn_config.internal_command_timeout = Duration::from_secs(10);
                })
                .with_performance_config(|perf_config| {
                    perf_config.broadcast_channel_capacity = MESSAGE_CAPACITY;
                })
                .set_policy(ReconnectPolicy::new_exponential(0, 100, 5000, 5));
            builder
        };

        let publisher = builder().build()?;
        publisher.init().await.context("failed to connect publisher")?;
        publisher
            .ping::<String>(None)
            .await
            .context("Valkey startup PING failed")?;

        let subscriber = builder().build_subscriber_client()?;
        subscriber
            .init()
            .await
            .context("failed to connect subscriber")?;
        // Re-issues PSUBSCRIBE after every reconnect.
        let _resubscribe = subscriber.manage_subscriptions();

        let pattern = config.subscription_pattern();
        tracing::info!(
            url = %config.cortex_redis,
            tls = fred_config.tls.is_some(),
            %pattern,
            "Valkey connection ready",
        );

        Ok(Self {
            subscriber,
            publisher,
            pattern,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Subscribe and serve until the subscription stream closes.
    ///
    /// The receive loop only decodes and submits, so it keeps draining the
    /// subscriber while requests run. Mutations apply in arrival order;
    /// reads and `execute` run concurrently.
    pub async fn run<F, R>(&self, dispatcher: Arc<Dispatcher<F, R>>) -> Result<()>
    where
        F: FileSystem + 'static,
        R: CommandRunner + 'static,
    {
        let hostname = dispatcher.node().hostname.clone();
        let (inbox, mut deliveries) = Inbox::start(dispatcher);
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                deliver(&publisher, &delivery.meta, &hostname, delivery.reply).await;
            }
        });

        let mut messages = self.subscriber.message_rx();
        self.subscriber
            .psubscribe(self.pattern.clone())
            .await
            .with_context(|| format!("failed to subscribe to {}", self.pattern))?;
        tracing::info!(pattern = %self.pattern, "listening for env events");

        loop {
            let message = match messages.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::error!(skipped, "subscriber lagged; requests dropped without reply");
                    continue;
                }
                Err(RecvError::Closed) => bail!("subscription stream closed"),
            };

            let channel = message.channel.to_string();
            let decoded = message
                .value
                .as_string()
                .ok_or(BusError::NotText)
                .and_then(|body| decode_message(&channel, &body));
            let (meta, payload) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "dropping undecodable message");
                    continue;
                }
            };

            inbox.submit(Request { meta, payload });
        }
    }

    /// Drop the subscription and close both connections.
    pub async fn shutdown(&self) {
        if let Err(e) = self.subscriber.punsubscribe(self.pattern.clone()).await {
            tracing::debug!(error = %e, "punsubscribe failed during shutdown");
        }
        let _ = self.subscriber.quit().await;
        let _ = self.publisher.quit().await;
        tracing::info!("Valkey connections closed");
    }
}

async fn deliver(publisher: &Client, meta: &Metadata, hostname: &str, reply: Reply) {
    let Some(reply_to) = meta.reply_to.as_deref() else {
        tracing::info!(
            event = %meta.event,
            failed = reply.is_error(),
            "no reply_to; reply not published",
        );
        return;
    };
    let body = match encode_reply(meta, hostname, reply) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(event = %meta.event, error = %e, "reply dropped");
            return;
        }
    };
    match publisher.publish::<i64, _, _>(reply_to, body).await {
        Ok(receivers) => tracing::debug!(reply_to, receivers, "reply published"),
        Err(e) => tracing::warn!(reply_to, error = %e, "failed to publish reply"),
    }
}

/// Split a raw bus message into dispatcher metadata and operation payload.
pub fn decode_message(
    channel: &str,
    body: &str,
) -> Result<(Metadata, serde_json::Value), BusError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(BusError::Envelope)?;
    let meta = Metadata {
        event: event_from_channel(channel).to_string(),
        channel: channel.to_string(),
        id: envelope.id,
        reply_to: envelope.reply_to,
    };
    Ok((meta, envelope.data))
}

/// Serialise `result` into the reply envelope for `meta`.
pub fn encode_reply(meta: &Metadata, hostname: &str, result: Reply) -> Result<String, BusError> {
    let envelope = ReplyEnvelope {
        id: meta.id.clone(),
        hostname: hostname.to_string(),
        at: Utc::now(),
        result,
    };
    serde_json::to_string(&envelope).map_err(BusError::Encode)
}

// ===================================================================
// TLS
// ===================================================================

/// rustls client config from the configured PEM files.
///
/// A CA alone yields server-authenticated TLS; a CA plus client
/// certificate and key yields mTLS. No CA means plaintext.
fn tls_client_config(config: &AgentConfig) -> Result<Option<rustls::ClientConfig>> {
    let Some(ca_path) = &config.tls_ca else {
        if config.tls_cert.is_some() {
            bail!("ENVIRON_TLS_CERT requires ENVIRON_TLS_CA");
        }
        return Ok(None);
    };

    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        root_store
            .add(cert)
            .context("failed to add CA cert to root store")?;
    }
    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let tls_config = match (&config.tls_cert, &config.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let client_certs = load_certs(cert_path)?;
            let key_file = File::open(key_path)
                .with_context(|| format!("failed to open client key: {}", key_path.display()))?;
            let client_key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
                .context("failed to parse client key")?
                .context("no private key found in file")?;
            builder
                .with_client_auth_cert(client_certs, client_key)
                .context("failed to build TLS config with client auth")?
        }
        _ => builder.with_no_client_auth(),
    };

    tracing::info!(
        ca = %ca_path.display(),
        mtls = config.tls_cert.is_some(),
        "TLS enabled for Valkey",
    );
    Ok(Some(tls_config))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file =
        File::open(path).with_context(|| format!("failed to open cert: {}", path.display()))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse cert: {}", path.display()))
}
