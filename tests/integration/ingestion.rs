use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dayahead::engine::bulk_fetch::{self, BulkFetchPlan};
use dayahead::engine::ProviderManager;
use dayahead::providers::nordpool::NordPoolProvider;
use dayahead::providers::Provider;
use dayahead::storage::SqlitePriceStore;
use dayahead::types::{IngestError, ProviderConfig, RunOptions};

struct Fixture {
    server: MockServer,
    store: Arc<SqlitePriceStore>,
    zone_ids: BTreeMap<&'static str, i64>,
    eur: i64,
}

async fn fixture() -> Fixture {
    let server = MockServer::start().await;
    let store = Arc::new(SqlitePriceStore::in_memory().await.unwrap());

    let mut zone_ids = BTreeMap::new();
    for (code, tz) in [
        ("SE1", "Europe/Stockholm"),
        ("SE2", "Europe/Stockholm"),
        ("SE3", "Europe/Stockholm"),
        ("FI", "Europe/Helsinki"),
    ] {
        zone_ids.insert(code, store.upsert_zone(code, code, tz).await.unwrap());
    }
    let eur = store.upsert_currency("EUR", "Euro").await.unwrap();

    Fixture {
        server,
        store,
        zone_ids,
        eur,
    }
}

impl Fixture {
    fn provider(&self, zones: &[&str]) -> NordPoolProvider {
        NordPoolProvider::new(
            "nordpool",
            ProviderConfig::new("0 13 * * *", true, zones.iter().copied(), ["EUR"]),
            self.store.clone(),
            &self.server.uri(),
        )
        .unwrap()
        .with_request_delay(Duration::ZERO)
    }

    async fn mount_prices(&self, zone: &str, prices: &[f64]) {
        Mock::given(method("GET"))
            .and(query_param("deliveryArea", zone))
            .respond_with(ResponseTemplate::new(200).set_body_string(body(zone, prices)))
            .mount(&self.server)
            .await;
    }

    async fn mount_failure(&self, zone: &str) {
        Mock::given(method("GET"))
            .and(query_param("deliveryArea", zone))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&self.server)
            .await;
    }

    async fn requested_zones(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|req| {
                req.url
                    .query_pairs()
                    .find(|(k, _)| k == "deliveryArea")
                    .map(|(_, v)| v.to_string())
            })
            .collect()
    }
}

/// Hourly entries for 2025-01-15 (CET), starting at 23:00Z the day before.
fn body(zone: &str, prices: &[f64]) -> String {
    let entries: Vec<serde_json::Value> = prices
        .iter()
        .enumerate()
        .map(|(hour, price)| {
            let start = NaiveDate::from_ymd_opt(2025, 1, 14)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap()
                .and_utc()
                + chrono::Duration::hours(hour as i64);
            serde_json::json!({
                "deliveryStart": start.to_rfc3339(),
                "deliveryEnd": (start + chrono::Duration::hours(1)).to_rfc3339(),
                "entryPerArea": { zone: price },
            })
        })
        .collect();

    serde_json::json!({
        "deliveryDateCET": "2025-01-15",
        "multiAreaEntries": entries,
        "currency": "EUR",
        "exchangeRate": 1,
    })
    .to_string()
}

fn local(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn opts(zone: &str) -> RunOptions {
    RunOptions::new(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(), zone, "EUR")
}

#[tokio::test]
async fn test_targeted_run_through_manager_persists_prices() {
    let fx = fixture().await;
    fx.mount_prices("SE3", &[453.7, 401.0, 12.34]).await;

    let mut manager = ProviderManager::new();
    manager.register_provider(Arc::new(fx.provider(&["SE3"])));

    manager
        .run_provider(&CancellationToken::new(), "nordpool", Some(&opts("SE3")))
        .await
        .unwrap();

    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 3);
    let se3 = fx.zone_ids["SE3"];
    let midnight = fx
        .store
        .fetch_spot_price(local(15, 0), se3, fx.eur)
        .await
        .unwrap()
        .expect("23:00Z stored as Stockholm midnight");
    assert_eq!(midnight.price, dec!(45.37));

    let last = fx
        .store
        .fetch_spot_price(local(15, 2), se3, fx.eur)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.price, dec!(1.234));
}

#[tokio::test]
async fn test_local_time_differs_per_zone_timezone() {
    let fx = fixture().await;
    fx.mount_prices("SE3", &[100.0]).await;
    fx.mount_prices("FI", &[100.0]).await;
    let provider = fx.provider(&["SE3", "FI"]);
    let cancel = CancellationToken::new();

    provider.run_with_options(&cancel, &opts("SE3")).await.unwrap();
    provider.run_with_options(&cancel, &opts("FI")).await.unwrap();

    // Same instant, 00:00 in Stockholm and 01:00 in Helsinki
    let se3 = fx.store.fetch_spot_price(local(15, 0), fx.zone_ids["SE3"], fx.eur).await.unwrap();
    let fi = fx.store.fetch_spot_price(local(15, 1), fx.zone_ids["FI"], fx.eur).await.unwrap();
    assert!(se3.is_some());
    assert!(fi.is_some());
    assert!(fx
        .store
        .fetch_spot_price(local(15, 0), fx.zone_ids["FI"], fx.eur)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let fx = fixture().await;
    fx.mount_prices("SE3", &[453.7, 401.0]).await;
    let provider = fx.provider(&["SE3"]);
    let cancel = CancellationToken::new();
    let se3 = fx.zone_ids["SE3"];

    provider.run_with_options(&cancel, &opts("SE3")).await.unwrap();
    let before = fx.store.fetch_spot_price(local(15, 0), se3, fx.eur).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    provider.run_with_options(&cancel, &opts("SE3")).await.unwrap();
    let after = fx.store.fetch_spot_price(local(15, 0), se3, fx.eur).await.unwrap().unwrap();

    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 2);
    assert_eq!(before.updated_at, after.updated_at);

    // A revised upstream price does update the row
    fx.server.reset().await;
    fx.mount_prices("SE3", &[460.0, 401.0]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    provider.run_with_options(&cancel, &opts("SE3")).await.unwrap();
    let revised = fx.store.fetch_spot_price(local(15, 0), se3, fx.eur).await.unwrap().unwrap();

    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 2);
    assert_eq!(revised.price, dec!(46));
    assert!(revised.updated_at > after.updated_at);
}

#[tokio::test]
async fn test_missing_zone_leaves_database_unchanged() {
    let fx = fixture().await;
    fx.mount_prices("SE3", &[453.7]).await;
    // SE1 request answered with SE3-only entries
    Mock::given(method("GET"))
        .and(query_param("deliveryArea", "SE1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body("SE3", &[1.0, 2.0])))
        .mount(&fx.server)
        .await;
    let provider = fx.provider(&["SE1", "SE3"]);
    let cancel = CancellationToken::new();

    provider.run_with_options(&cancel, &opts("SE3")).await.unwrap();
    let before = fx.store.count_spot_prices().await.unwrap();

    let result = provider.run_with_options(&cancel, &opts("SE1")).await;

    assert!(matches!(result, Err(IngestError::MissingZonePrice(z)) if z == "SE1"));
    assert_eq!(fx.store.count_spot_prices().await.unwrap(), before);
}

#[tokio::test]
async fn test_unknown_zone_in_store_fails() {
    let fx = fixture().await;
    fx.mount_prices("SE4", &[1.0]).await;
    // SE4 is supported by the provider but was never seeded
    let provider = fx.provider(&["SE4"]);

    let result = provider
        .run_with_options(&CancellationToken::new(), &opts("SE4"))
        .await;
    assert!(matches!(result, Err(IngestError::ZoneNotFound(_))));
}

#[tokio::test]
async fn test_unsupported_zone_makes_no_request() {
    let fx = fixture().await;
    let mut manager = ProviderManager::new();
    manager.register_provider(Arc::new(fx.provider(&["SE3"])));

    let result = manager
        .run_provider(&CancellationToken::new(), "nordpool", Some(&opts("FI")))
        .await;

    assert!(matches!(result, Err(IngestError::UnsupportedZone { .. })));
    assert!(fx.requested_zones().await.is_empty());
    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 0);
}

#[tokio::test]
async fn test_scheduled_run_stops_at_first_failure() {
    let fx = fixture().await;
    fx.mount_prices("SE1", &[10.0]).await;
    fx.mount_failure("SE2").await;
    fx.mount_prices("SE3", &[30.0]).await;
    let provider = fx.provider(&["SE1", "SE2", "SE3"]);

    let result = provider.run(&CancellationToken::new()).await;

    assert!(matches!(result, Err(IngestError::Upstream { status: 500, .. })));
    assert_eq!(fx.requested_zones().await, vec!["SE1", "SE2"]);
    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 1);
}

#[tokio::test]
async fn test_scheduled_run_targets_tomorrow() {
    let fx = fixture().await;
    fx.mount_prices("SE3", &[10.0]).await;
    let provider = fx.provider(&["SE3"]);

    provider.run(&CancellationToken::new()).await.unwrap();

    let tomorrow = (chrono::Utc::now().date_naive() + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let requests = fx.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .url
        .query_pairs()
        .any(|(k, v)| k == "date" && v == tomorrow));
}

#[tokio::test]
async fn test_bulk_fetch_continues_past_failed_zone() {
    let fx = fixture().await;
    fx.mount_prices("SE1", &[10.0]).await;
    fx.mount_failure("SE2").await;
    fx.mount_prices("SE3", &[30.0]).await;

    let mut manager = ProviderManager::new();
    manager.register_provider(Arc::new(fx.provider(&["SE1", "SE2", "SE3"])));

    let day = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let plan = BulkFetchPlan {
        start: day,
        end: day,
        zones: vec!["SE1".into(), "SE2".into(), "SE3".into()],
        currencies: vec!["EUR".into()],
    };
    let summary =
        bulk_fetch::execute(Arc::new(manager), "nordpool".into(), plan, Duration::ZERO).await;

    assert_eq!(fx.requested_zones().await, vec!["SE1", "SE2", "SE3"]);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(fx.store.count_spot_prices().await.unwrap(), 2);
}
