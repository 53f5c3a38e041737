//! Live and snapshot accessors.
//!
//! [`AuroraWatch`] is the read interface shared by both accessor flavours:
//!
//! - [`AuroraWatchClient`] is live. Every read consults the refresh engine,
//!   so two reads may see different documents if one expired in between.
//! - [`Snapshot`] is frozen. Each resource kind is captured from the live
//!   client on its first read, error included, and every later read of that
//!   kind returns the captured value without touching the network.
//!
//! Derived reads (`status_level`, `status_color`, ...) combine the status
//! and the descriptions table. When `raise_on_error` is false they report
//! "unknown" values instead of failing; direct resource reads always fail.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::engine::RefreshEngine;
use crate::error::Result;
use crate::model::{Activity, Descriptions, LevelDescription, Status, StatusLevel};
use crate::transport::{HttpTransport, Transport};

/// Description reported for an unknown status.
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

/// Meaning reported for an unknown status.
pub const UNKNOWN_MEANING: &str = "Unknown.";

/// How derived reads behave when the underlying read fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub raise_on_error: bool,
    pub unknown_status_color: String,
}

impl ErrorPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            raise_on_error: config.raise_on_error,
            unknown_status_color: config.unknown_status_color.clone(),
        }
    }

    /// Pass `result` through, or swap a failure for `unknown` when not raising.
    pub fn apply<T>(&self, result: Result<T>, unknown: impl FnOnce() -> T) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.raise_on_error => Err(e),
            Err(e) => {
                warn!(error = %e, "Reporting unknown status");
                Ok(unknown())
            }
        }
    }
}

/// Read access to AuroraWatch UK data.
#[async_trait]
pub trait AuroraWatch: Send + Sync {
    /// Current status. Fails regardless of `raise_on_error`.
    async fn status(&self) -> Result<Arc<Status>>;

    /// Recent activity. Fails regardless of `raise_on_error`.
    async fn activity(&self) -> Result<Arc<Activity>>;

    /// Color, meaning and description for each level.
    async fn descriptions(&self) -> Result<Arc<Descriptions>>;

    fn error_policy(&self) -> &ErrorPolicy;

    /// Description-table entry for the current status level.
    async fn current_description(&self) -> Result<LevelDescription> {
        let status = self.status().await?;
        let descriptions = self.descriptions().await?;
        Ok(descriptions.get(status.level).clone())
    }

    async fn status_level(&self) -> Result<StatusLevel> {
        let level = self.status().await.map(|s| StatusLevel::Known(s.level));
        self.error_policy().apply(level, || StatusLevel::Unknown)
    }

    /// `#rrggbb` color of the current status.
    async fn status_color(&self) -> Result<String> {
        let color = self.current_description().await.map(|d| d.color);
        let policy = self.error_policy();
        policy.apply(color, || policy.unknown_status_color.clone())
    }

    async fn status_description(&self) -> Result<String> {
        let description = self.current_description().await.map(|d| d.description);
        self.error_policy()
            .apply(description, || UNKNOWN_DESCRIPTION.to_string())
    }

    async fn status_meaning(&self) -> Result<String> {
        let meaning = self.current_description().await.map(|d| d.meaning);
        self.error_policy()
            .apply(meaning, || UNKNOWN_MEANING.to_string())
    }
}

/// Live AuroraWatch UK client.
///
/// Cheap to clone; clones share one refresh engine and therefore one
/// in-memory cache.
#[derive(Clone)]
pub struct AuroraWatchClient {
    engine: Arc<RefreshEngine>,
    policy: ErrorPolicy,
}

impl AuroraWatchClient {
    /// Client talking HTTP to `config.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            clock: None,
            descriptions: None,
        }
    }

    /// Freeze a view of this client's data.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.clone())
    }

    /// Fetch the descriptions table again, replacing the cached copy.
    pub async fn refresh_descriptions(&self) -> Result<Arc<Descriptions>> {
        self.engine.refresh_descriptions().await
    }

    pub fn engine(&self) -> &RefreshEngine {
        &self.engine
    }
}

#[async_trait]
impl AuroraWatch for AuroraWatchClient {
    async fn status(&self) -> Result<Arc<Status>> {
        self.engine.status().await
    }

    async fn activity(&self) -> Result<Arc<Activity>> {
        self.engine.activity().await
    }

    async fn descriptions(&self) -> Result<Arc<Descriptions>> {
        self.engine.descriptions().await
    }

    fn error_policy(&self) -> &ErrorPolicy {
        &self.policy
    }
}

/// Builder for clients with a custom transport, clock or fixed
/// descriptions table.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    descriptions: Option<Descriptions>,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `descriptions` instead of fetching the table from the API.
    pub fn descriptions(mut self, descriptions: Descriptions) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn build(self) -> Result<AuroraWatchClient> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut engine = RefreshEngine::new(&self.config, transport, clock)?;
        if let Some(descriptions) = self.descriptions {
            engine = engine.with_descriptions(descriptions);
        }

        Ok(AuroraWatchClient {
            engine: Arc::new(engine),
            policy: ErrorPolicy::from_config(&self.config),
        })
    }
}

/// A frozen view of a client's data.
///
/// Reads of the same kind always agree: `status_level` and `status_color`
/// on one snapshot describe the same status document.
pub struct Snapshot {
    live: AuroraWatchClient,
    status: OnceCell<Result<Arc<Status>>>,
    activity: OnceCell<Result<Arc<Activity>>>,
    descriptions: OnceCell<Result<Arc<Descriptions>>>,
}

impl Snapshot {
    pub fn new(live: AuroraWatchClient) -> Self {
        Self {
            live,
            status: OnceCell::new(),
            activity: OnceCell::new(),
            descriptions: OnceCell::new(),
        }
    }
}

#[async_trait]
impl AuroraWatch for Snapshot {
    async fn status(&self) -> Result<Arc<Status>> {
        self.status.get_or_init(|| self.live.status()).await.clone()
    }

    async fn activity(&self) -> Result<Arc<Activity>> {
        self.activity.get_or_init(|| self.live.activity()).await.clone()
    }

    async fn descriptions(&self) -> Result<Arc<Descriptions>> {
        self.descriptions
            .get_or_init(|| self.live.descriptions())
            .await
            .clone()
    }

    fn error_policy(&self) -> &ErrorPolicy {
        self.live.error_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{AlertLevel, ResourceKind};
    use crate::parser::fixtures::*;
    use crate::testing::{MockTransport, test_config};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 24, 12, 0, 0).unwrap()
    }

    struct Harness {
        client: AuroraWatchClient,
        transport: Arc<MockTransport>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn url(&self, kind: ResourceKind) -> String {
            self.client.engine().url(kind)
        }
    }

    fn harness(config: ClientConfig) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::new(start()));
        let client = AuroraWatchClient::builder(config)
            .transport(transport.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        Harness {
            client,
            transport,
            clock,
        }
    }

    fn serve_all(h: &Harness, level: &str) {
        let expires = Some(start() + TimeDelta::seconds(60));
        h.transport
            .respond(&h.url(ResourceKind::Status), status_with_level(level), expires);
        h.transport
            .respond(&h.url(ResourceKind::Activity), activity_document(), expires);
        h.transport
            .respond(&h.url(ResourceKind::Descriptions), DESCRIPTIONS, None);
    }

    #[tokio::test]
    async fn test_live_derived_reads() {
        let h = harness(test_config());
        serve_all(&h, "red");

        assert_eq!(h.client.status_level().await.unwrap(), AlertLevel::Red);
        assert_eq!(h.client.status_color().await.unwrap(), "#ff0000");
        assert_eq!(
            h.client.status_description().await.unwrap(),
            "Red alert: aurora likely"
        );
        assert!(!h.client.status_meaning().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_reads_follow_refreshes() {
        let h = harness(test_config());
        serve_all(&h, "green");
        assert_eq!(h.client.status_level().await.unwrap(), AlertLevel::Green);

        h.transport.respond(
            &h.url(ResourceKind::Status),
            status_with_level("amber"),
            Some(start() + TimeDelta::seconds(120)),
        );
        h.clock.advance(TimeDelta::seconds(61));
        assert_eq!(h.client.status_level().await.unwrap(), AlertLevel::Amber);
    }

    #[tokio::test]
    async fn test_snapshot_is_consistent_across_refreshes() {
        let h = harness(test_config());
        serve_all(&h, "green");
        let snapshot = h.client.snapshot();

        let level = snapshot.status_level().await.unwrap();

        // The live document changes underneath the snapshot.
        h.transport.respond(
            &h.url(ResourceKind::Status),
            status_with_level("red"),
            Some(start() + TimeDelta::seconds(120)),
        );
        h.clock.advance(TimeDelta::seconds(61));
        assert_eq!(h.client.status_level().await.unwrap(), AlertLevel::Red);

        assert_eq!(snapshot.status_level().await.unwrap(), level);
        assert_eq!(snapshot.status_color().await.unwrap(), "#33ff33");
        assert_eq!(h.transport.calls(&h.url(ResourceKind::Status)), 2);
    }

    #[tokio::test]
    async fn test_snapshot_captures_each_kind_lazily() {
        let h = harness(test_config());
        serve_all(&h, "yellow");
        let snapshot = h.client.snapshot();

        snapshot.status().await.unwrap();
        assert_eq!(h.transport.calls(&h.url(ResourceKind::Activity)), 0);

        let first = snapshot.activity().await.unwrap();
        h.clock.advance(TimeDelta::hours(2));
        let second = snapshot.activity().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.transport.calls(&h.url(ResourceKind::Activity)), 1);
    }

    #[tokio::test]
    async fn test_snapshot_captures_errors() {
        let h = harness(test_config());
        h.transport.fail(&h.url(ResourceKind::Status));
        let snapshot = h.client.snapshot();

        let first = assert_err!(snapshot.status().await);
        serve_all(&h, "green");
        let second = assert_err!(snapshot.status().await);

        assert_eq!(first, second);
        assert_eq!(h.transport.calls(&h.url(ResourceKind::Status)), 1);

        // The live client is not stuck.
        assert_ok!(h.client.status().await);
    }

    #[tokio::test]
    async fn test_unknown_values_when_not_raising() {
        let h = harness(ClientConfig {
            raise_on_error: false,
            unknown_status_color: "#123456".to_string(),
            ..test_config()
        });
        h.transport.fail(&h.url(ResourceKind::Status));
        h.transport
            .respond(&h.url(ResourceKind::Descriptions), DESCRIPTIONS, None);

        assert_eq!(h.client.status_level().await.unwrap(), StatusLevel::Unknown);
        assert_eq!(h.client.status_level().await.unwrap().as_str(), "unknown");
        assert_eq!(h.client.status_color().await.unwrap(), "#123456");
        assert_eq!(h.client.status_description().await.unwrap(), "Unknown");
        assert_eq!(h.client.status_meaning().await.unwrap(), "Unknown.");

        // Direct reads still fail.
        assert!(assert_err!(h.client.status().await).is_retrieval());
    }

    #[tokio::test]
    async fn test_derived_reads_fail_when_raising() {
        let h = harness(test_config());
        h.transport.fail(&h.url(ResourceKind::Status));

        assert_err!(h.client.status_level().await);
        assert_err!(h.client.status_color().await);
    }

    #[tokio::test]
    async fn test_unknown_description_when_table_fails() {
        let h = harness(ClientConfig {
            raise_on_error: false,
            ..test_config()
        });
        serve_all(&h, "amber");
        h.transport.fail(&h.url(ResourceKind::Descriptions));

        assert_eq!(h.client.status_level().await.unwrap(), AlertLevel::Amber);
        assert_eq!(h.client.status_color().await.unwrap(), "#777777");
    }

    #[tokio::test]
    async fn test_fixed_descriptions() {
        let table = crate::parser::parse_descriptions(DESCRIPTIONS.as_bytes(), "en").unwrap();
        let transport = Arc::new(MockTransport::new());
        let client = AuroraWatchClient::builder(test_config())
            .transport(transport.clone())
            .descriptions(table)
            .build()
            .unwrap();

        let descriptions = client.descriptions().await.unwrap();
        let levels: Vec<_> = descriptions.levels().collect();
        assert_eq!(levels, AlertLevel::ALL.to_vec());
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_displayable_messages_skip_test_priority() {
        let h = harness(test_config());
        h.transport
            .respond(&h.url(ResourceKind::Status), STATUS_GREEN, None);

        let status = h.client.status().await.unwrap();
        let ids: Vec<_> = status.displayable_messages().map(|m| m.id.as_str()).collect();
        assert!(!ids.contains(&"msg-2"));
        assert!(ids.contains(&"msg-1"));
    }

    #[tokio::test]
    async fn test_refresh_descriptions() {
        let h = harness(test_config());
        serve_all(&h, "green");
        h.client.descriptions().await.unwrap();
        h.client.refresh_descriptions().await.unwrap();
        assert_eq!(h.transport.calls(&h.url(ResourceKind::Descriptions)), 2);
    }
}
