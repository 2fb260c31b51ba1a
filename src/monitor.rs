use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::SharedCatalog;
use crate::models::Product;
use crate::store::ProductStore;
use crate::storefront::{BuildId, DEFAULT_CATEGORIES, StorefrontClient};
use crate::traits::Notifier;

/// Timing and batching knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub categories: Vec<String>,
    /// Pending products that force a save once reached.
    pub save_batch_size: usize,
    /// Pause between full cycles.
    pub poll_interval: Duration,
    /// Pause after a failed build-id discovery.
    pub retry_interval: Duration,
    /// Safety-net save cadence, checked once per cycle.
    pub save_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(ToString::to_string).collect(),
            save_batch_size: 2,
            poll_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(30),
            save_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// What one pass over the categories did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub new_products: usize,
    pub failed_categories: Vec<String>,
    pub saves: usize,
}

#[derive(Clone)]
pub struct Monitor {
    storefront: StorefrontClient,
    store: ProductStore,
    catalog: SharedCatalog,
    notifiers: Vec<Arc<dyn Notifier>>,
    settings: MonitorSettings,
}

impl Monitor {
    /// Notifiers are invoked in the order given for every new product.
    pub fn new(
        storefront: StorefrontClient,
        store: ProductStore,
        catalog: SharedCatalog,
        notifiers: Vec<Arc<dyn Notifier>>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            storefront,
            store,
            catalog,
            notifiers,
            settings,
        }
    }

    /// Seeds the catalog from disk. Returns whether a usable snapshot existed.
    pub async fn load_known_products(&self) -> bool {
        let loaded = self.store.load().await;
        let added = self.catalog.lock().await.seed(loaded.products);

        if loaded.initialized {
            info!("Monitoring with {} known products", added);
        } else {
            info!("Products file not initialized, every product will be treated as new");
        }
        loaded.initialized
    }

    /// Polls until `shutdown` is cancelled. Cancellation is noticed between
    /// steps; a request already in flight runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            categories = self.settings.categories.len(),
            "Starting monitor"
        );
        let mut next_periodic_save = Instant::now() + self.settings.save_interval;

        while !shutdown.is_cancelled() {
            let build_id = match self.storefront.discover_build_id().await {
                Ok(build_id) => build_id,
                Err(e) => {
                    error!(error = %e, "Failed to fetch build ID");
                    if !pause(self.settings.retry_interval, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let report = self.run_cycle(&build_id, &shutdown).await;
            if report.new_products > 0 {
                info!(
                    fetched = report.fetched,
                    failed = report.failed_categories.len(),
                    saves = report.saves,
                    "Found {} new products",
                    report.new_products
                );
            } else {
                info!(
                    fetched = report.fetched,
                    failed = report.failed_categories.len(),
                    "No new products found"
                );
            }

            if Instant::now() >= next_periodic_save {
                next_periodic_save = Instant::now() + self.settings.save_interval;
                if self.catalog.pending_len().await > 0 {
                    if let Err(e) = self.persist().await {
                        error!(error = %e, "Failed to save known products");
                    }
                }
            }

            info!(
                "Sleeping for {} seconds...",
                self.settings.poll_interval.as_secs()
            );
            if !pause(self.settings.poll_interval, &shutdown).await {
                break;
            }
        }

        info!("Monitor stopped");
    }

    /// Fetches every category once, reconciling and notifying as it goes.
    /// A failed category is logged and skipped until the next cycle.
    pub async fn run_cycle(
        &self,
        build_id: &BuildId,
        shutdown: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        for category in &self.settings.categories {
            if shutdown.is_cancelled() {
                break;
            }

            let products = match self.storefront.fetch_category(build_id, category).await {
                Ok(products) => products,
                Err(e) => {
                    error!(category = %category, error = %e, "Failed to fetch products");
                    report.failed_categories.push(category.clone());
                    continue;
                }
            };
            report.fetched += products.len();

            let admitted = self.reconcile(products).await;
            report.new_products += admitted.len();

            if self.persist_if_batch_full().await {
                report.saves += 1;
            }
        }

        // Catches a full batch left behind by an earlier failed save.
        if !shutdown.is_cancelled() && self.persist_if_batch_full().await {
            report.saves += 1;
        }

        report
    }

    /// Admits unseen products under the catalog lock, then notifies about
    /// each one with the lock released.
    pub async fn reconcile(&self, products: Vec<Product>) -> Vec<Product> {
        let admitted = self.catalog.admit(products).await;

        for product in &admitted {
            info!(id = %product.id, title = %product.title, "New product found");
            self.dispatch(product).await;
        }

        admitted
    }

    async fn dispatch(&self, product: &Product) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.send(product).await {
                warn!(
                    notifier = notifier.name(),
                    id = %product.id,
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }

    /// Writes the full catalog and empties the pending buffer. The lock is
    /// held for the whole write so no product can be admitted between the
    /// snapshot and the clear.
    pub async fn persist(&self) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        info!(pending = catalog.pending_len(), "Saving known products...");

        self.store.save(&catalog.snapshot()).await?;
        catalog.clear_pending();
        Ok(())
    }

    async fn persist_if_batch_full(&self) -> bool {
        let pending = self.catalog.pending_len().await;
        if pending == 0 || pending < self.settings.save_batch_size {
            return false;
        }

        match self.persist().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to save known products");
                false
            }
        }
    }
}

/// Sleeps for `duration`; returns false if `shutdown` fired first.
async fn pause(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::transport::StealthClient;

    const HOME_HTML: &str =
        r#"<script src="https://store.example/_next/static/build42/_ssgManifest.js"></script>"#;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, product: &Product) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, product.id));
            if self.fail {
                bail!("{} is down", self.name);
            }
            Ok(())
        }
    }

    struct Harness {
        server: MockServer,
        _dir: TempDir,
        store: ProductStore,
        log: Log,
    }

    impl Harness {
        async fn new() -> Self {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/us/en"))
                .respond_with(ResponseTemplate::new(200).set_body_string(HOME_HTML))
                .mount(&server)
                .await;

            let dir = TempDir::new().unwrap();
            let store = ProductStore::new(dir.path().join("products.json"));
            Self {
                server,
                _dir: dir,
                store,
                log: Log::default(),
            }
        }

        async fn serve_category(&self, category: &str, ids: &[&str]) {
            let products: Vec<_> = ids
                .iter()
                .map(|id| serde_json::json!({"id": id, "title": format!("title-{id}")}))
                .collect();
            let body = serde_json::json!({
                "pageProps": {"subCategories": [{"products": products}]}
            });
            Mock::given(method("GET"))
                .and(path("/_next/data/build42/us/en.json"))
                .and(query_param("category", category))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&self.server)
                .await;
        }

        fn monitor(&self, categories: &[&str], batch: usize, failing_chat: bool) -> Monitor {
            let storefront = StorefrontClient::new(
                StealthClient::new().unwrap(),
                format!("{}/us/en", self.server.uri()),
            );
            let notifiers: Vec<Arc<dyn Notifier>> = vec![
                Arc::new(Recording {
                    name: "chat",
                    log: self.log.clone(),
                    fail: failing_chat,
                }),
                Arc::new(Recording {
                    name: "push",
                    log: self.log.clone(),
                    fail: false,
                }),
            ];
            let settings = MonitorSettings {
                categories: categories.iter().map(ToString::to_string).collect(),
                save_batch_size: batch,
                poll_interval: Duration::from_millis(20),
                retry_interval: Duration::from_millis(20),
                save_interval: Duration::from_secs(3600),
            };
            Monitor::new(
                storefront,
                self.store.clone(),
                SharedCatalog::new(),
                notifiers,
                settings,
            )
        }

        fn saved_ids(&self) -> Vec<String> {
            let text = std::fs::read_to_string(self.store.path())
                .unwrap_or_default();
            if text.trim().is_empty() {
                return Vec::new();
            }
            let products: Vec<Product> = serde_json::from_str(&text).unwrap();
            products.into_iter().map(|p| p.id).collect()
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn build_id() -> BuildId {
        BuildId::new("build42")
    }

    async fn run_once(monitor: &Monitor) -> CycleReport {
        monitor
            .run_cycle(&build_id(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn batch_threshold_saves_mid_cycle_and_leaves_remainder_pending() {
        let harness = Harness::new().await;
        harness.serve_category("first", &["p1", "p2"]).await;
        harness.serve_category("second", &["p3", "p1"]).await;
        let monitor = harness.monitor(&["first", "second"], 2, false);

        assert!(!monitor.load_known_products().await);
        let report = run_once(&monitor).await;

        assert_eq!(report.new_products, 3);
        assert_eq!(report.saves, 1);
        assert_eq!(harness.saved_ids(), ["p1", "p2"]);
        assert_eq!(monitor.catalog.pending_len().await, 1);

        monitor.persist().await.unwrap();
        assert_eq!(harness.saved_ids(), ["p1", "p2", "p3"]);
        assert_eq!(monitor.catalog.pending_len().await, 0);
    }

    #[tokio::test]
    async fn single_new_product_does_not_reach_threshold() {
        let harness = Harness::new().await;
        harness.serve_category("only", &["p1"]).await;
        let monitor = harness.monitor(&["only"], 2, false);

        monitor.load_known_products().await;
        let report = run_once(&monitor).await;

        assert_eq!(report.saves, 0);
        assert!(harness.saved_ids().is_empty());
        assert_eq!(monitor.catalog.pending_len().await, 1);
    }

    #[tokio::test]
    async fn notifies_chat_then_push_exactly_once_per_product() {
        let harness = Harness::new().await;
        harness.serve_category("only", &["p1", "p2", "p1"]).await;
        let monitor = harness.monitor(&["only"], 10, false);

        run_once(&monitor).await;
        run_once(&monitor).await;

        assert_eq!(harness.log(), ["chat:p1", "push:p1", "chat:p2", "push:p2"]);
        assert_eq!(monitor.catalog.len().await, 2);
    }

    #[tokio::test]
    async fn failed_notification_still_marks_product_known() {
        let harness = Harness::new().await;
        harness.serve_category("only", &["p1", "p2"]).await;
        let monitor = harness.monitor(&["only"], 2, true);

        let report = run_once(&monitor).await;

        assert_eq!(harness.log(), ["chat:p1", "push:p1", "chat:p2", "push:p2"]);
        assert_eq!(report.saves, 1);
        assert_eq!(harness.saved_ids(), ["p1", "p2"]);
    }

    #[tokio::test]
    async fn full_batch_is_saved_before_sleeping_even_when_every_category_fails() {
        let harness = Harness::new().await;
        let monitor = harness.monitor(&["missing"], 2, false);
        let leftovers: Vec<Product> = serde_json::from_str(r#"[{"id":"p1"},{"id":"p2"}]"#).unwrap();
        monitor.catalog.admit(leftovers).await;

        let report = run_once(&monitor).await;

        assert_eq!(report.failed_categories, ["missing"]);
        assert_eq!(report.saves, 1);
        assert_eq!(harness.saved_ids(), ["p1", "p2"]);
        assert_eq!(monitor.catalog.pending_len().await, 0);
    }

    #[tokio::test]
    async fn failing_category_is_skipped() {
        let harness = Harness::new().await;
        Mock::given(method("GET"))
            .and(query_param("category", "broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&harness.server)
            .await;
        harness.serve_category("healthy", &["p1"]).await;
        let monitor = harness.monitor(&["broken", "healthy"], 2, false);

        let report = run_once(&monitor).await;

        assert_eq!(report.failed_categories, ["broken"]);
        assert_eq!(report.new_products, 1);
    }

    #[tokio::test]
    async fn products_from_disk_are_not_announced_again() {
        let harness = Harness::new().await;
        std::fs::write(
            harness.store.path(),
            r#"[{"id": "p1", "title": "stored"}]"#,
        )
        .unwrap();
        harness.serve_category("only", &["p1", "p2"]).await;
        let monitor = harness.monitor(&["only"], 10, false);

        assert!(monitor.load_known_products().await);
        run_once(&monitor).await;

        assert_eq!(harness.log(), ["chat:p2", "push:p2"]);
    }

    #[tokio::test]
    async fn cancelled_cycle_fetches_nothing() {
        let harness = Harness::new().await;
        harness.serve_category("only", &["p1"]).await;
        let monitor = harness.monitor(&["only"], 2, false);
        let token = CancellationToken::new();
        token.cancel();

        let report = monitor.run_cycle(&build_id(), &token).await;

        assert_eq!(report.fetched, 0);
        assert!(harness.log().is_empty());
    }

    #[tokio::test]
    async fn run_saves_pending_products_on_periodic_timer_and_stops_on_cancel() {
        let harness = Harness::new().await;
        harness.serve_category("only", &["p1"]).await;
        let mut monitor = harness.monitor(&["only"], 10, false);
        monitor.settings.save_interval = Duration::ZERO;

        let token = CancellationToken::new();
        let task = tokio::spawn({
            let monitor = monitor.clone();
            let token = token.clone();
            async move { monitor.run(token).await }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while harness.saved_ids().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(harness.saved_ids(), ["p1"]);
    }

    #[tokio::test]
    async fn run_keeps_retrying_discovery_until_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no manifest</html>"))
            .mount(&server)
            .await;
        let harness = Harness {
            server,
            ..Harness::new().await
        };
        let monitor = harness.monitor(&["only"], 2, false);

        let token = CancellationToken::new();
        let task = tokio::spawn({
            let token = token.clone();
            async move { monitor.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let home_requests = harness.server.received_requests().await.unwrap().len();
        assert!(home_requests >= 2);
        assert!(harness.log().is_empty());
    }
}
