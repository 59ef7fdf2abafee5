// Integration tests for Immo Match

use immo_match::core::{AutoMatchScheduler, FixedClock, MatchScorer, MatchingEngine, SystemClock};
use immo_match::models::{
    Demand, DemandKind, MatchFilter, MatchStatus, MatchType, OfferedProperty, Property,
    SearchCriteria, TransactionType,
};
use immo_match::services::{DemandRepository, MatchStore, SnapshotRepository};
use immo_match::StatsAggregator;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn create_search_demand(id: &str, transaction: TransactionType, city: &str) -> Demand {
    Demand {
        id: id.to_string(),
        full_name: format!("Client {}", id),
        is_active: true,
        kind: DemandKind::Search {
            criteria: SearchCriteria {
                transaction: Some(transaction),
                cities: vec![city.to_string()],
                budget_min: Some(500_000),
                budget_max: Some(2_000_000),
                ..Default::default()
            },
        },
        created_at: None,
    }
}

fn create_sale_demand(id: &str, city: &str, price: u64) -> Demand {
    Demand {
        id: id.to_string(),
        full_name: format!("Owner {}", id),
        is_active: true,
        kind: DemandKind::Sale {
            offer: OfferedProperty {
                property_type: Some("Appartement".to_string()),
                city: Some(city.to_string()),
                price: Some(price),
                ..Default::default()
            },
        },
        created_at: None,
    }
}

fn create_property(id: &str, category: TransactionType, city: &str, price: u64) -> Property {
    Property {
        id: id.to_string(),
        title: format!("Appartement {}", id),
        property_type: "Appartement".to_string(),
        category,
        location: format!("Centre Ville, {}", city),
        city: city.to_string(),
        price,
        beds: 2,
        baths: 1,
        area: 85,
        features: vec![],
        url: String::new(),
    }
}

fn create_engine(demands: Vec<Demand>, properties: Vec<Property>) -> MatchingEngine {
    MatchingEngine::new(
        MatchScorer::default(),
        Arc::new(SnapshotRepository::from_records(demands)),
        Arc::new(SnapshotRepository::from_records(properties)),
        Arc::new(MatchStore::default()),
    )
}

fn casablanca_engine() -> MatchingEngine {
    create_engine(
        vec![
            create_search_demand("d1", TransactionType::Sale, "Casablanca"),
            create_search_demand("d2", TransactionType::Rent, "Casablanca"),
            create_sale_demand("o1", "Casablanca", 1_100_000),
        ],
        vec![
            create_property("p1", TransactionType::Sale, "Casablanca", 1_500_000),
            create_property("p2", TransactionType::Sale, "Casablanca", 1_900_000),
            create_property("p3", TransactionType::Sale, "Rabat", 9_000_000),
        ],
    )
}

#[test]
fn test_integration_casablanca_scenario() {
    let engine = casablanca_engine();
    engine.run(None);

    let m = engine
        .store()
        .list_for_demand("d1")
        .into_iter()
        .find(|m| m.matched_entity_id() == "p1")
        .expect("p1 should match d1");

    assert!(m.match_score > 0);
    assert_eq!(m.status, MatchStatus::Pending);
    assert!(m.match_reasons.contains(&"Budget match".to_string()));
    assert!(m.match_reasons.contains(&"City: Casablanca".to_string()));
}

#[test]
fn test_integration_rent_demand_never_matches_sale_listings() {
    let engine = casablanca_engine();
    engine.run(None);

    assert!(engine.store().list_for_demand("d2").is_empty());
}

#[test]
fn test_integration_demand_to_demand_match() {
    let engine = casablanca_engine();
    engine.run(None);

    let filter = MatchFilter {
        status: None,
        match_type: Some(MatchType::DemandToDemand),
    };
    let matches = engine.store().list(&filter);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].demand_id, "d1");
    assert_eq!(matches[0].matched_entity_id(), "o1");

    // The owner side sees the match pointing at it
    assert_eq!(engine.store().list_for_demand("o1").len(), 1);
}

#[test]
fn test_integration_rerun_is_idempotent() {
    let engine = casablanca_engine();
    engine.run(None);
    let first: HashMap<String, u8> = engine
        .store()
        .snapshot()
        .into_iter()
        .map(|m| (m.id, m.match_score))
        .collect();

    let summary = engine.run(None);
    let second: HashMap<String, u8> = engine
        .store()
        .snapshot()
        .into_iter()
        .map(|m| (m.id, m.match_score))
        .collect();

    assert_eq!(summary.new_matches, 0);
    assert_eq!(first, second);
}

#[test]
fn test_integration_identity_tuples_are_unique() {
    let engine = casablanca_engine();
    engine.run(None);
    engine.run(Some("d1"));
    engine.run(Some("o1"));

    let matches = engine.store().snapshot();
    let mut identities: Vec<(String, MatchType, String)> = matches
        .iter()
        .map(|m| (m.demand_id.clone(), m.match_type(), m.matched_entity_id().to_string()))
        .collect();
    identities.sort();
    identities.dedup();

    assert_eq!(identities.len(), matches.len());
}

#[test]
fn test_integration_terminal_status_survives_rerun() {
    let engine = casablanca_engine();
    engine.run(None);

    let store = engine.store();
    let ids: Vec<String> = store.list_for_demand("d1").into_iter().map(|m| m.id).collect();
    store.update_status(&ids[0], MatchStatus::Notified).unwrap();
    store.update_status(&ids[0], MatchStatus::Rejected).unwrap();
    store.update_status(&ids[1], MatchStatus::Contacted).unwrap();
    store.update_status(&ids[1], MatchStatus::Successful).unwrap();

    engine.run(None);

    assert_eq!(store.get(&ids[0]).unwrap().status, MatchStatus::Rejected);
    assert_eq!(store.get(&ids[1]).unwrap().status, MatchStatus::Successful);
}

#[test]
fn test_integration_bulk_delete_with_already_deleted_id() {
    let engine = casablanca_engine();
    engine.run(None);

    let store = engine.store();
    let ids: Vec<String> = store.list_for_demand("d1").into_iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 3);
    let (id1, id2, id3) = (ids[0].clone(), ids[1].clone(), ids[2].clone());

    assert!(store.delete(&id2));
    assert_eq!(store.bulk_delete(&[id1.clone(), id2, id3.clone()]), 2);

    let demands = SnapshotRepository::<Demand>::default();
    let properties = SnapshotRepository::<Property>::default();
    let remaining = store.list_enriched(&MatchFilter::default(), &demands, &properties);
    assert!(remaining.iter().all(|m| m.record.id != id1 && m.record.id != id3));
    assert!(remaining.is_empty());
}

#[test]
fn test_integration_stats_follow_store() {
    let engine = casablanca_engine();
    engine.run(None);

    let stats = StatsAggregator::new(Arc::clone(engine.store())).stats();

    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status[&MatchStatus::Pending], 3);
    assert_eq!(stats.by_type[&MatchType::DemandToProperty], 2);
    assert_eq!(stats.by_type[&MatchType::DemandToDemand], 1);
    assert!(stats.avg_score > 0.0 && stats.avg_score <= 100.0);
}

#[test]
fn test_integration_snapshot_survives_restart() {
    let path = std::env::temp_dir().join(format!("immo-match-{}.json", uuid::Uuid::new_v4()));
    let engine = casablanca_engine();
    engine.run(None);
    engine.store().save(&path).unwrap();

    let restored = MatchStore::load(&path, Arc::new(SystemClock)).unwrap();
    std::fs::remove_file(&path).ok();

    let mut before: Vec<String> = engine.store().snapshot().into_iter().map(|m| m.id).collect();
    let mut after: Vec<String> = restored.snapshot().into_iter().map(|m| m.id).collect();
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn test_integration_stop_before_first_tick_leaves_no_run() {
    let scheduler = AutoMatchScheduler::new(Arc::new(casablanca_engine()), Arc::new(SystemClock));

    scheduler.set_interval(5).unwrap();
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    scheduler.stop();
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;

    assert!(scheduler.last_run_at().is_none());
    assert!(scheduler.engine().store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_integration_ticks_notify_subscribers() {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let scheduler = AutoMatchScheduler::new(Arc::new(casablanca_engine()), clock.clone());
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&outcomes);
    scheduler.on_complete(move |outcome| {
        sink.lock().unwrap().push(outcome.new_matches);
        Ok(())
    });

    scheduler.set_interval(5).unwrap();
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    scheduler.stop();

    assert_eq!(*outcomes.lock().unwrap(), vec![3, 0]);
    assert_eq!(scheduler.last_run_at(), Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
}

/// Demand source that parks inside `active()` until released
struct ParkedDemands {
    inner: SnapshotRepository<Demand>,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
    calls: AtomicUsize,
}

impl DemandRepository for ParkedDemands {
    fn active(&self) -> Vec<Demand> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.active()
    }

    fn get(&self, id: &str) -> Option<Demand> {
        self.inner.get(id)
    }
}

#[test]
fn test_integration_run_now_is_single_flight() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let demands = Arc::new(ParkedDemands {
        inner: SnapshotRepository::from_records(vec![create_search_demand("d1", TransactionType::Sale, "Casablanca")]),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        calls: AtomicUsize::new(0),
    });
    let engine = MatchingEngine::new(
        MatchScorer::default(),
        demands.clone(),
        Arc::new(SnapshotRepository::from_records(vec![create_property(
            "p1",
            TransactionType::Sale,
            "Casablanca",
            1_500_000,
        )])),
        Arc::new(MatchStore::default()),
    );
    let scheduler = AutoMatchScheduler::new(Arc::new(engine), Arc::new(SystemClock));

    let background = scheduler.clone();
    let first = std::thread::spawn(move || background.run_now());
    entered_rx.recv().unwrap();

    // The first run is parked inside the engine
    let second = scheduler.run_now();
    assert_eq!(second.new_matches, 0);
    assert_eq!(demands.calls.load(Ordering::SeqCst), 1);

    release_tx.send(()).unwrap();
    assert_eq!(first.join().unwrap().new_matches, 1);
}
