//! End-to-end pipeline runs against a scripted provider

use crate::support::provider::{bare, fast_config, place, Call, ScriptedProvider};
use lead_harvester::harvest::{HarvestRequest, IngestionError, IngestionPipeline, RunStatus};
use lead_harvester::output::csv::read_leads;
use lead_harvester::provider::ProviderError;
use lead_harvester::shutdown::ShutdownCoordinator;
use lead_harvester::RawPlaceRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const QUERY: &str = "Dental offices in {}";

#[tokio::test]
async fn test_sequential_run_validates_dedups_and_stores() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search(
            "N2J 4Z2",
            Ok(vec![
                place("p1", "Bright Smiles Dental", "(519) 555-0101"),
                bare(Some("p-nc"), "No Contact Dental", ""),
                bare(Some("p-empty"), "   ", "519-555-0109"),
            ]),
        )
        .search(
            "N2J 4Z3",
            Ok(vec![
                place("p1", "Bright Smiles Dental", "(519) 555-0101"),
                bare(Some("p2"), "Joe's Pizza", "(519) 555-0100"),
            ]),
        )
        .search(
            "N2J 4Z4",
            Ok(vec![
                bare(Some("p3"), "joes pizza", "519-555-0100"),
                place("p4", "Test Dental", "519-555-0104"),
            ]),
        )
        .shared();

    let config = fast_config(dir.path());
    let paths = config.output_paths();
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 3))
        .await
        .unwrap();

    let state = &report.state;
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.postal_codes_total, 3);
    assert_eq!(state.postal_codes_processed, 3);
    assert_eq!(state.postal_codes_failed, 0);
    assert_eq!(state.records_found, 7);
    assert_eq!(state.records_kept, 2);
    assert_eq!(state.records_duplicate, 2);
    assert_eq!(state.records_rejected, 3);
    assert_eq!(state.search_calls, 3);
    assert_eq!(state.detail_calls, 0);
    assert!(report.failed_codes.is_empty());
    assert_eq!(report.store.total_records, 2);

    assert_eq!(provider.search_calls(), vec!["N2J 4Z2", "N2J 4Z3", "N2J 4Z4"]);
    assert_eq!(
        provider.calls()[0],
        Call::Search {
            query: "Dental offices in N2J 4Z2".to_string(),
            postal_code: "N2J 4Z2".to_string(),
        }
    );

    pipeline.close().await.unwrap();
    let loaded = read_leads(&paths.csv).unwrap();
    assert_eq!(loaded.skipped, 0);
    assert_eq!(loaded.records.len(), 2);

    let first = &loaded.records[0];
    assert_eq!(first.name, "Bright Smiles Dental");
    assert_eq!(first.phone.as_deref(), Some("+1 519-555-0101"));
    assert_eq!(first.primary_type, "dentist");
    assert_eq!(first.search_query, "Dental offices in N2J 4Z2");
    assert_eq!(first.search_location, "N2J 4Z2");

    let second = &loaded.records[1];
    assert_eq!(second.name, "Joe's Pizza");
    assert_eq!(second.search_location, "N2J 4Z3");
    assert_eq!(second.primary_type, "establishment");

    assert!(paths.xlsx.exists());
}

#[tokio::test]
async fn test_template_without_placeholder_fails_before_any_call() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new().shared();
    let pipeline = IngestionPipeline::open(
        provider.clone(),
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    let result = pipeline
        .run(HarvestRequest::new("Dental offices", "N2J 4Z2", 3))
        .await;
    assert!(matches!(result, Err(IngestionError::InvalidTemplate(_))));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_start_code_fails_before_any_call() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new().shared();
    let pipeline = IngestionPipeline::open(
        provider.clone(),
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    let result = pipeline.run(HarvestRequest::new(QUERY, "ABC", 3)).await;
    assert!(matches!(result, Err(IngestionError::PostalCode(_))));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected_on_open() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.min_delay = Duration::from_secs(2);
    config.max_delay = Duration::from_secs(1);

    let result = IngestionPipeline::open(
        ScriptedProvider::new().shared(),
        config,
        ShutdownCoordinator::shared(),
    )
    .await;
    assert!(matches!(result, Err(IngestionError::Config(_))));
}

#[tokio::test]
async fn test_failed_code_is_skipped_and_run_continues() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", Ok(vec![place("p1", "Maple Dental", "519-555-0101")]))
        .search(
            "N2J 4Z3",
            Err(ProviderError::InvalidResponse("unexpected body".to_string())),
        )
        .search("N2J 4Z4", Ok(vec![place("p2", "Oak Dental", "519-555-0102")]))
        .shared();

    let pipeline = IngestionPipeline::open(
        provider.clone(),
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 3))
        .await
        .unwrap();

    assert_eq!(report.state.status, RunStatus::Completed);
    assert_eq!(report.state.postal_codes_processed, 3);
    assert_eq!(report.state.postal_codes_failed, 1);
    assert_eq!(report.state.records_kept, 2);
    assert_eq!(report.state.retries, 0);
    assert_eq!(report.failed_codes, vec!["N2J 4Z3".to_string()]);
    assert_eq!(provider.search_calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries_then_fail_code() {
    let dir = tempdir().unwrap();
    let network = || Err(ProviderError::Network("connection reset".to_string()));
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", network())
        .search("N2J 4Z2", network())
        .search("N2J 4Z2", network())
        .search("N2J 4Z3", Ok(vec![place("p1", "Maple Dental", "519-555-0101")]))
        .shared();

    let mut config = fast_config(dir.path());
    config.max_retries = 2;
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 2))
        .await
        .unwrap();

    assert_eq!(provider.search_calls(), vec!["N2J 4Z2", "N2J 4Z2", "N2J 4Z2", "N2J 4Z3"]);
    assert_eq!(report.state.retries, 2);
    assert_eq!(report.state.search_calls, 4);
    assert_eq!(report.state.postal_codes_failed, 1);
    assert_eq!(report.state.records_kept, 1);
    assert_eq!(report.failed_codes, vec!["N2J 4Z2".to_string()]);
    // 1 s + 2 s of backoff
    assert!(report.state.elapsed >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_quota_exceeded_backs_off_then_succeeds() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search(
            "N2J 4Z2",
            Err(ProviderError::QuotaExceeded {
                retry_after: Some(Duration::from_secs(45)),
            }),
        )
        .search("N2J 4Z2", Ok(vec![place("p1", "Maple Dental", "519-555-0101")]))
        .shared();

    let pipeline = IngestionPipeline::open(
        provider.clone(),
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 1))
        .await
        .unwrap();

    assert_eq!(report.state.status, RunStatus::Completed);
    assert_eq!(report.state.retries, 1);
    assert_eq!(report.state.search_calls, 2);
    assert_eq!(report.state.records_kept, 1);
    assert_eq!(report.state.postal_codes_failed, 0);
    assert!(report.state.elapsed >= Duration::from_secs(45));
}

#[tokio::test]
async fn test_auth_failure_aborts_run_after_flushing() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", Ok(vec![place("p1", "Maple Dental", "519-555-0101")]))
        .search("N2J 4Z3", Err(ProviderError::Auth("API key invalid".to_string())))
        .shared();

    let config = fast_config(dir.path());
    let paths = config.output_paths();
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let result = pipeline.run(HarvestRequest::new(QUERY, "N2J 4Z2", 3)).await;

    assert!(matches!(result, Err(IngestionError::Auth(_))));
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.postal_codes_processed, 1);
    assert_eq!(snapshot.records_kept, 1);
    assert_eq!(provider.search_calls(), vec!["N2J 4Z2", "N2J 4Z3"]);

    let loaded = read_leads(&paths.csv).unwrap();
    assert_eq!(loaded.records.len(), 1);
    assert!(paths.xlsx.exists());
}

#[tokio::test]
async fn test_consecutive_geocode_failures_abort_run() {
    let dir = tempdir().unwrap();
    let geocode = || Err(ProviderError::GeocodeFailure("ZERO_RESULTS".to_string()));
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", geocode())
        .search("N2J 4Z3", geocode())
        .shared();

    let mut config = fast_config(dir.path());
    config.max_consecutive_geocode_failures = 2;
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let result = pipeline.run(HarvestRequest::new(QUERY, "N2J 4Z2", 4)).await;

    match result {
        Err(IngestionError::GeocodeFailures {
            failures,
            postal_code,
        }) => {
            assert_eq!(failures, 2);
            assert_eq!(postal_code, "N2J 4Z3");
        }
        other => panic!("expected geocode abort, got {other:?}"),
    }
    assert_eq!(provider.search_calls(), vec!["N2J 4Z2", "N2J 4Z3"]);
    assert_eq!(pipeline.snapshot().status, RunStatus::Failed);
}

#[tokio::test]
async fn test_successful_search_resets_geocode_failure_count() {
    let dir = tempdir().unwrap();
    let geocode = || Err(ProviderError::GeocodeFailure("ZERO_RESULTS".to_string()));
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", geocode())
        .search("N2J 4Z3", Ok(vec![place("p1", "Maple Dental", "519-555-0101")]))
        .search("N2J 4Z4", geocode())
        .shared();

    let mut config = fast_config(dir.path());
    config.max_consecutive_geocode_failures = 2;
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 4))
        .await
        .unwrap();

    assert_eq!(report.state.status, RunStatus::Completed);
    assert_eq!(report.state.postal_codes_processed, 4);
    assert_eq!(report.state.postal_codes_failed, 2);
    assert_eq!(report.failed_codes, vec!["N2J 4Z2".to_string(), "N2J 4Z4".to_string()]);
}

#[tokio::test]
async fn test_detailed_mode_enriches_and_falls_back() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search(
            "N2J 4Z2",
            Ok(vec![
                bare(Some("d1"), "Maple Dental", "519-555-0111"),
                bare(Some("d2"), "Oak Dental", "519-555-0112"),
                bare(None, "Pine Dental", "519-555-0113"),
            ]),
        )
        .details(
            "d1",
            Ok(RawPlaceRecord {
                place_id: Some("d1".to_string()),
                name: "Maple Dental Centre".to_string(),
                phone: Some("+1 519-555-0199".to_string()),
                website: Some("https://mapledental.ca".to_string()),
                rating: Some(4.7),
                ..Default::default()
            }),
        )
        .shared();

    let mut config = fast_config(dir.path());
    config.detailed = true;
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 1))
        .await
        .unwrap();

    assert_eq!(provider.detail_calls(), 2);
    assert_eq!(report.state.detail_calls, 2);
    assert_eq!(report.state.records_kept, 3);

    let records = pipeline.store().records().await.unwrap();
    let maple = &records[0];
    assert_eq!(maple.name, "Maple Dental Centre");
    assert_eq!(maple.phone.as_deref(), Some("+1 519-555-0199"));
    assert_eq!(maple.website.as_deref(), Some("https://mapledental.ca"));
    assert_eq!(maple.rating, Some(4.7));

    let oak = &records[1];
    assert_eq!(oak.name, "Oak Dental");
    assert_eq!(oak.phone.as_deref(), Some("+1 519-555-0112"));
    assert_eq!(oak.website, None);
}

#[tokio::test]
async fn test_basic_mode_skips_details() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search("N2J 4Z2", Ok(vec![bare(Some("d1"), "Maple Dental", "519-555-0111")]))
        .shared();

    let pipeline = IngestionPipeline::open(
        provider.clone(),
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 1))
        .await
        .unwrap();

    assert_eq!(provider.detail_calls(), 0);
    assert_eq!(report.state.records_kept, 1);
}

#[tokio::test]
async fn test_results_capped_per_location() {
    let dir = tempdir().unwrap();
    let results: Vec<_> = (0..5)
        .map(|i| place(&format!("p{i}"), &format!("Dental {i}"), &format!("519-555-010{i}")))
        .collect();
    let provider = ScriptedProvider::new().search("N2J 4Z2", Ok(results)).shared();

    let mut config = fast_config(dir.path());
    config.max_results_per_location = 3;
    let pipeline = IngestionPipeline::open(provider, config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "N2J 4Z2", 1))
        .await
        .unwrap();

    assert_eq!(report.state.records_found, 3);
    assert_eq!(report.state.records_kept, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_workers_share_dedup_and_store() {
    let dir = tempdir().unwrap();
    let mut provider = ScriptedProvider::new().with_latency(Duration::from_millis(5));
    for i in 1..=6 {
        provider = provider.search(
            &format!("1000{i}"),
            Ok(vec![
                place("shared", "Shared Dental", "212-555-0100"),
                place(&format!("u{i}"), &format!("Unique Dental {i}"), &format!("212-555-02{i:02}")),
            ]),
        );
    }
    let provider = provider.shared();

    let mut config = fast_config(dir.path());
    config.parallel = true;
    config.workers = 3;
    let paths = config.output_paths();
    let pipeline = IngestionPipeline::open(provider.clone(), config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "10001", 6))
        .await
        .unwrap();

    assert_eq!(report.state.status, RunStatus::Completed);
    assert_eq!(report.state.postal_codes_processed, 6);
    assert_eq!(report.state.records_kept, 7);
    assert_eq!(report.state.records_duplicate, 5);
    assert_eq!(report.store.unique_place_ids, 7);

    let mut searched = provider.search_calls();
    searched.sort();
    assert_eq!(searched, vec!["10001", "10002", "10003", "10004", "10005", "10006"]);

    pipeline.close().await.unwrap();
    let loaded = read_leads(&paths.csv).unwrap();
    assert_eq!(loaded.records.len(), 7);
    assert_eq!(loaded.skipped, 0);
}

#[tokio::test]
async fn test_observer_sees_monotonic_progress() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search("10001", Ok(vec![place("p1", "Maple Dental", "212-555-0101")]))
        .search("10003", Ok(vec![place("p2", "Oak Dental", "212-555-0102")]))
        .shared();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = IngestionPipeline::open(
        provider,
        fast_config(dir.path()),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap()
    .with_observer({
        let seen = seen.clone();
        move |state| seen.lock().push((state.postal_codes_processed, state.status))
    });

    pipeline
        .run(HarvestRequest::new(QUERY, "10001", 3))
        .await
        .unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(seen[0], (1, RunStatus::Running));
    assert_eq!(seen[3], (3, RunStatus::Completed));
}

#[tokio::test]
async fn test_periodic_spreadsheet_refresh() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new()
        .search("10001", Ok(vec![place("p1", "Maple Dental", "212-555-0101")]))
        .with_hook({
            let xlsx = dir.path().join("leads.xlsx");
            move |call| {
                // second code starts after the refresh triggered by the first
                if let Call::Search { postal_code, .. } = call {
                    if postal_code == "10002" {
                        assert!(xlsx.exists());
                    }
                }
            }
        })
        .shared();

    let mut config = fast_config(dir.path());
    config.xlsx_refresh_every = 1;
    let pipeline = IngestionPipeline::open(provider, config, ShutdownCoordinator::shared())
        .await
        .unwrap();
    let report = pipeline
        .run(HarvestRequest::new(QUERY, "10001", 2))
        .await
        .unwrap();
    assert_eq!(report.state.records_kept, 1);
}
