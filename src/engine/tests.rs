use ulid::Ulid;

use super::*;
use crate::catalog::{CatalogUnit, StaticCatalog, Venue};
use crate::clock::ManualClock;

const H: Ms = HOUR_MS;
const M: Ms = 60_000; // 1 minute in ms
/// 2026-01-01T00:00:00Z
const DAY: Ms = 1_767_225_600_000;
const RATE: Money = 150;

fn at(hour: i64, minute: i64) -> Ms {
    DAY + hour * H + minute * M
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("deskbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn test_catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new([
        Venue {
            id: "arena".into(),
            name: "Arena".into(),
            address: "1 Main St".into(),
            hourly_rate: RATE,
            advertised_free_units: 5,
            units: (1..=5)
                .map(|unit| CatalogUnit {
                    unit,
                    description: Some(format!("station {unit}")),
                })
                .collect(),
        },
        Venue {
            id: "annex".into(),
            name: "Annex".into(),
            address: String::new(),
            hourly_rate: 90,
            advertised_free_units: 1,
            units: vec![CatalogUnit { unit: 1, description: None }],
        },
    ]))
}

fn engine_at(name: &str, now: Ms) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let engine = Engine::new(test_wal_path(name), test_catalog(), clock.clone()).unwrap();
    (engine, clock)
}

/// Reopen an engine on an existing WAL without truncating it.
fn reopen(name: &str, clock: Arc<ManualClock>) -> Engine {
    let path = std::env::temp_dir().join("deskbook_test_engine").join(name);
    Engine::new(path, test_catalog(), clock).unwrap()
}

fn req(unit: u32, holder: &str, start: Ms, hours: i64) -> NewReservation {
    NewReservation {
        venue_id: "arena".into(),
        unit,
        holder_id: holder.into(),
        start,
        hours,
    }
}

/// The cached flag must equal "some active reservation covers now".
async fn assert_flag_consistent(engine: &Engine, unit: u32) {
    let now = engine.now_ms();
    let covered = engine
        .list_active("arena", unit)
        .await
        .unwrap()
        .iter()
        .any(|r| r.span.contains_instant(now));
    let resource = engine.get_resource("arena", unit).await.unwrap();
    assert_eq!(resource.available, !covered, "flag out of sync on unit {unit}");
}

async fn assert_no_overlaps(engine: &Engine, unit: u32) {
    let active = engine.list_active("arena", unit).await.unwrap();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{:?} overlaps {:?}", a.span, b.span);
        }
    }
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_computes_window_and_price() {
    let (engine, _) = engine_at("create_basic.wal", at(8, 0));
    let r = engine.create_reservation(req(3, "alice", at(10, 0), 2)).await.unwrap();

    assert_eq!(r.span, Span::new(at(10, 0), at(12, 0)));
    assert_eq!(r.total_price, 2 * RATE);
    assert_eq!(r.status, ReservationStatus::Active);
    assert_eq!(r.holder_id, "alice");
    assert_eq!(r.created_at, at(8, 0));
    assert_eq!(engine.get_reservation(&r.id), Some(r.clone()));
    assert_eq!(engine.list_active("arena", 3).await.unwrap(), vec![r]);
}

#[tokio::test]
async fn non_positive_hours_rejected_before_lookup() {
    let (engine, _) = engine_at("invalid_hours.wal", at(8, 0));
    for hours in [0, -1] {
        let result = engine.create_reservation(req(3, "alice", at(10, 0), hours)).await;
        assert!(matches!(result, Err(EngineError::InvalidDuration(h)) if h == hours));
    }
    // Validation happens before admission touches the registry or the log.
    assert_eq!(engine.resource_count(), 0);
    assert_eq!(engine.reservation_count(), 0);
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn oversized_request_is_limited() {
    let (engine, _) = engine_at("too_long.wal", at(8, 0));
    let result = engine
        .create_reservation(req(3, "alice", at(10, 0), crate::limits::MAX_RESERVATION_HOURS + 1))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn unknown_unit_or_venue_is_resource_not_found() {
    let (engine, _) = engine_at("resource_not_found.wal", at(8, 0));
    let result = engine.create_reservation(req(99, "alice", at(10, 0), 1)).await;
    assert!(matches!(
        result,
        Err(EngineError::ResourceNotFound(ref key)) if *key == ResourceKey::new("arena", 99)
    ));

    let mut elsewhere = req(1, "alice", at(10, 0), 1);
    elsewhere.venue_id = "nowhere".into();
    let result = engine.create_reservation(elsewhere).await;
    assert!(matches!(result, Err(EngineError::ResourceNotFound(_))));
    assert_eq!(engine.reservation_count(), 0);
}

#[tokio::test]
async fn registered_unit_without_venue_rate_is_venue_not_found() {
    let (engine, _) = engine_at("venue_not_found.wal", at(8, 0));
    engine
        .register_resource(ResourceKey::new("ghost", 1), None)
        .await
        .unwrap();

    let mut ghost = req(1, "alice", at(10, 0), 1);
    ghost.venue_id = "ghost".into();
    let result = engine.create_reservation(ghost).await;
    assert!(matches!(result, Err(EngineError::VenueNotFound(ref v)) if v == "ghost"));
    assert_eq!(engine.reservation_count(), 0);
}

#[tokio::test]
async fn overlap_is_slot_unavailable_and_writes_nothing() {
    let (engine, _) = engine_at("overlap.wal", at(8, 0));
    let a = engine.create_reservation(req(3, "alice", at(10, 0), 2)).await.unwrap();
    let appends = engine.wal_appends_since_compact().await;

    let b = engine.create_reservation(req(3, "bob", at(11, 0), 2)).await;
    assert!(matches!(b, Err(EngineError::SlotUnavailable(id)) if id == a.id));
    assert_eq!(engine.wal_appends_since_compact().await, appends);
    assert_eq!(engine.list_for_holder("bob", false).await.unwrap(), vec![]);

    // Same window on another unit is fine.
    engine.create_reservation(req(4, "bob", at(11, 0), 2)).await.unwrap();
}

#[tokio::test]
async fn adjacent_reservations_do_not_conflict() {
    let (engine, _) = engine_at("adjacent.wal", at(8, 0));
    engine.create_reservation(req(3, "alice", at(10, 0), 2)).await.unwrap();
    engine.create_reservation(req(3, "bob", at(12, 0), 1)).await.unwrap();
    engine.create_reservation(req(3, "carol", at(9, 0), 1)).await.unwrap();
    assert_eq!(engine.list_active("arena", 3).await.unwrap().len(), 3);
    assert_no_overlaps(&engine, 3).await;
}

#[tokio::test]
async fn booking_covering_now_marks_unit_unavailable() {
    let (engine, _) = engine_at("flag_now.wal", at(10, 30));
    engine.create_reservation(req(1, "alice", at(10, 0), 2)).await.unwrap();
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);
    assert_flag_consistent(&engine, 1).await;
}

#[tokio::test]
async fn future_booking_leaves_unit_available() {
    let (engine, _) = engine_at("flag_future.wal", at(8, 0));
    engine.create_reservation(req(1, "alice", at(10, 0), 2)).await.unwrap();
    assert!(engine.get_resource("arena", 1).await.unwrap().available);
    assert_eq!(engine.free_units("arena").await, 1);
}

#[tokio::test]
async fn future_booking_marks_unit_busy_when_earlier_one_has_started() {
    let (engine, clock) = engine_at("flag_started_since.wal", at(8, 0));
    engine.create_reservation(req(1, "alice", at(9, 0), 2)).await.unwrap();
    assert!(engine.get_resource("arena", 1).await.unwrap().available);

    clock.set(at(9, 30));
    engine.create_reservation(req(1, "bob", at(14, 0), 1)).await.unwrap();
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);
    assert_flag_consistent(&engine, 1).await;
}

#[tokio::test]
async fn start_near_i64_max_is_rejected_without_overflow() {
    let (engine, _) = engine_at("start_overflow.wal", at(8, 0));
    for start in [i64::MAX - 1000, i64::MAX - 1] {
        let result = engine.create_reservation(req(1, "alice", start, 1)).await;
        assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    }
    assert_eq!(engine.reservation_count(), 0);
    assert_eq!(engine.resource_count(), 0);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_exactly_one_wins() {
    let (engine, _) = engine_at("race_same_unit.wal", at(8, 0));
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for k in 0..40 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Every window starts within the same hour, so all pairs overlap.
            engine
                .create_reservation(req(2, &format!("user-{k}"), at(10, k), 1))
                .await
        }));
    }

    let mut wins = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::SlotUnavailable(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(rejected, 39);
    assert_eq!(engine.list_active("arena", 2).await.unwrap().len(), 1);
    assert_eq!(engine.reservation_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_different_units_all_succeed() {
    let (engine, _) = engine_at("race_many_units.wal", at(8, 0));
    let engine = Arc::new(engine);

    let results = futures::future::join_all((1..=5).map(|unit| {
        let engine = engine.clone();
        async move {
            engine
                .create_reservation(req(unit, "alice", at(10, 0), 3))
                .await
        }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(engine.resource_count(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_bookings_admit_the_unit_once() {
    let (engine, _) = engine_at("race_admission.wal", at(8, 0));
    let engine = Arc::new(engine);

    let results = futures::future::join_all((0..10).map(|k| {
        let engine = engine.clone();
        async move {
            engine
                .create_reservation(req(5, "alice", at(10 + 2 * k, 0), 1))
                .await
        }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(engine.resource_count(), 1);
    assert_eq!(engine.list_active("arena", 5).await.unwrap().len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_concurrent_load_never_overlaps() {
    let (engine, _) = engine_at("race_mixed.wal", at(0, 0));
    let engine = Arc::new(engine);

    // Deterministic pseudo-random windows over one day on two units.
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut handles = Vec::new();
    for k in 0..120 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let unit = 1 + (seed % 2) as u32;
        let start = at(2, 0) + ((seed >> 8) % (20 * 60)) as Ms * M;
        let hours = 1 + ((seed >> 24) % 3) as i64;
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(req(unit, &format!("u{k}"), start, hours))
                .await
        }));
    }
    for h in handles {
        match h.await.unwrap() {
            Ok(_) | Err(EngineError::SlotUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_no_overlaps(&engine, 1).await;
    assert_no_overlaps(&engine, 2).await;
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_unknown_is_not_found() {
    let (engine, _) = engine_at("cancel_not_found.wal", at(8, 0));
    let id = Ulid::new();
    let result = engine.cancel_reservation(id, "alice").await;
    assert!(matches!(result, Err(EngineError::NotFound(x)) if x == id));
}

#[tokio::test]
async fn cancel_by_other_user_is_forbidden() {
    let (engine, _) = engine_at("cancel_forbidden.wal", at(8, 0));
    let r = engine.create_reservation(req(1, "alice", at(12, 0), 1)).await.unwrap();
    let result = engine.cancel_reservation(r.id, "mallory").await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
    assert!(engine.get_reservation(&r.id).unwrap().is_active());
}

#[tokio::test]
async fn cancel_lead_time_boundary() {
    let (engine, clock) = engine_at("cancel_boundary.wal", at(8, 0));
    let r = engine.create_reservation(req(1, "alice", at(12, 0), 1)).await.unwrap();

    clock.set(at(11, 0) + 1);
    let result = engine.cancel_reservation(r.id, "alice").await;
    assert!(matches!(result, Err(EngineError::TooLateToCancel { start, .. }) if start == at(12, 0)));
    assert!(engine.get_reservation(&r.id).unwrap().is_active());

    // Exactly one hour before start is still allowed.
    clock.set(at(11, 0));
    let cancelled = engine.cancel_reservation(r.id, "alice").await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(engine.list_active("arena", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_after_start_is_too_late() {
    let (engine, clock) = engine_at("cancel_started.wal", at(8, 0));
    let r = engine.create_reservation(req(1, "alice", at(9, 0), 2)).await.unwrap();
    clock.set(at(9, 30));
    let result = engine.cancel_reservation(r.id, "alice").await;
    assert!(matches!(result, Err(EngineError::TooLateToCancel { .. })));
}

#[tokio::test]
async fn recancel_is_already_final_every_time() {
    let (engine, _) = engine_at("recancel.wal", at(8, 0));
    let r = engine.create_reservation(req(1, "alice", at(12, 0), 1)).await.unwrap();
    engine.cancel_reservation(r.id, "alice").await.unwrap();
    let appends = engine.wal_appends_since_compact().await;

    for _ in 0..3 {
        let again = engine.cancel_reservation(r.id, "alice").await;
        assert!(matches!(
            again,
            Err(EngineError::AlreadyFinal { status: ReservationStatus::Cancelled, .. })
        ));
    }
    assert_eq!(engine.wal_appends_since_compact().await, appends);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_transition_once() {
    let (engine, _) = engine_at("race_cancel.wal", at(8, 0));
    let engine = Arc::new(engine);
    let r = engine.create_reservation(req(1, "alice", at(12, 0), 1)).await.unwrap();

    let results = futures::future::join_all((0..8).map(|_| {
        let engine = engine.clone();
        async move { engine.cancel_reservation(r.id, "alice").await }
    }))
    .await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::AlreadyFinal { .. }))
    );
}

#[tokio::test]
async fn cancelled_window_can_be_rebooked() {
    let (engine, _) = engine_at("rebook.wal", at(8, 0));
    let r = engine.create_reservation(req(1, "alice", at(12, 0), 2)).await.unwrap();
    engine.cancel_reservation(r.id, "alice").await.unwrap();
    engine.create_reservation(req(1, "bob", at(12, 0), 2)).await.unwrap();
}

#[tokio::test]
async fn cancel_of_future_booking_keeps_current_occupancy() {
    let (engine, _) = engine_at("cancel_keeps_flag.wal", at(10, 0));
    engine.create_reservation(req(1, "alice", at(10, 0), 1)).await.unwrap();
    let later = engine.create_reservation(req(1, "bob", at(14, 0), 1)).await.unwrap();
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);

    engine.cancel_reservation(later.id, "bob").await.unwrap();
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);
    assert_flag_consistent(&engine, 1).await;
}

// ── Complete ─────────────────────────────────────────────

#[tokio::test]
async fn sweep_completes_ended_reservations_and_frees_unit() {
    let (engine, clock) = engine_at("sweep.wal", at(10, 0));
    let now_r = engine.create_reservation(req(1, "alice", at(10, 0), 1)).await.unwrap();
    let later = engine.create_reservation(req(1, "bob", at(15, 0), 1)).await.unwrap();
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);

    clock.set(at(11, 0)); // end is exclusive: [10:00, 11:00) has ended
    assert_eq!(engine.sweep_completions().await.unwrap(), 1);
    assert_eq!(
        engine.get_reservation(&now_r.id).unwrap().status,
        ReservationStatus::Completed
    );
    assert!(engine.get_reservation(&later.id).unwrap().is_active());
    assert!(engine.get_resource("arena", 1).await.unwrap().available);

    // Nothing left to complete.
    assert_eq!(engine.sweep_completions().await.unwrap(), 0);

    let result = engine.cancel_reservation(now_r.id, "alice").await;
    assert!(matches!(
        result,
        Err(EngineError::AlreadyFinal { status: ReservationStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn sweep_marks_unit_busy_once_a_booking_starts() {
    let (engine, clock) = engine_at("sweep_start.wal", at(8, 0));
    engine.create_reservation(req(2, "alice", at(9, 0), 1)).await.unwrap();
    assert!(engine.get_resource("arena", 2).await.unwrap().available);

    clock.set(at(9, 15));
    assert_eq!(engine.sweep_completions().await.unwrap(), 0);
    assert!(!engine.get_resource("arena", 2).await.unwrap().available);
    assert_flag_consistent(&engine, 2).await;
}

#[tokio::test]
async fn flag_tracks_ledger_after_every_mutation() {
    let (engine, clock) = engine_at("flag_sampling.wal", at(9, 0));
    let a = engine.create_reservation(req(1, "alice", at(9, 0), 1)).await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    let b = engine.create_reservation(req(1, "bob", at(11, 0), 2)).await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    let c = engine.create_reservation(req(1, "carol", at(14, 0), 1)).await.unwrap();
    assert_flag_consistent(&engine, 1).await;

    engine.cancel_reservation(c.id, "carol").await.unwrap();
    assert_flag_consistent(&engine, 1).await;

    clock.set(at(10, 0));
    engine.sweep_completions().await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    assert_eq!(engine.get_reservation(&a.id).unwrap().status, ReservationStatus::Completed);

    // b has started with no sweep since; the next create must notice.
    clock.set(at(11, 30));
    engine.create_reservation(req(1, "dave", at(16, 0), 1)).await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);

    clock.set(at(12, 0));
    engine.sweep_completions().await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);

    clock.set(at(13, 0));
    engine.sweep_completions().await.unwrap();
    assert_flag_consistent(&engine, 1).await;
    assert_eq!(engine.get_reservation(&b.id).unwrap().status, ReservationStatus::Completed);
}

// ── Scenario ─────────────────────────────────────────────

#[tokio::test]
async fn venue_unit_three_scenario() {
    let (engine, clock) = engine_at("scenario.wal", at(9, 0));
    let engine = Arc::new(engine);
    engine.sync_catalog().await.unwrap();
    assert!(engine.get_resource("arena", 3).await.unwrap().available);

    let a = engine.create_reservation(req(3, "a", at(10, 0), 2)).await.unwrap();
    assert_eq!(a.total_price, 2 * RATE);

    let b = engine.create_reservation(req(3, "b", at(11, 0), 2)).await;
    assert!(matches!(b, Err(EngineError::SlotUnavailable(id)) if id == a.id));

    let c = engine.create_reservation(req(3, "c", at(12, 0), 1)).await.unwrap();
    assert_eq!(c.total_price, RATE);

    clock.set(at(9, 30));
    engine.cancel_reservation(a.id, "a").await.unwrap();
    assert!(engine.get_resource("arena", 3).await.unwrap().available);
    assert_eq!(engine.list_active("arena", 3).await.unwrap(), vec![c]);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn holder_listing_is_ordered_and_filterable() {
    let (engine, clock) = engine_at("holder_list.wal", at(8, 0));
    let late = engine.create_reservation(req(1, "alice", at(18, 0), 1)).await.unwrap();
    let early = engine.create_reservation(req(2, "alice", at(9, 0), 1)).await.unwrap();
    let mid = engine.create_reservation(req(3, "alice", at(12, 0), 1)).await.unwrap();
    engine.create_reservation(req(4, "bob", at(10, 0), 1)).await.unwrap();
    engine.cancel_reservation(mid.id, "alice").await.unwrap();

    let all: Vec<Ulid> = engine
        .list_for_holder("alice", false)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(all, vec![early.id, mid.id, late.id]);

    clock.set(at(10, 0)); // early has ended, mid is cancelled
    let upcoming: Vec<Ulid> = engine
        .list_for_holder("alice", true)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(upcoming, vec![late.id]);
}

#[tokio::test]
async fn venue_listing_reports_units_by_number() {
    let (engine, _) = engine_at("venue_list.wal", at(10, 0));
    assert_eq!(engine.sync_catalog().await.unwrap(), 6);
    engine.create_reservation(req(4, "alice", at(10, 0), 1)).await.unwrap();

    let units = engine.list_venue_resources("arena").await;
    assert_eq!(units.iter().map(|r| r.unit).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert_eq!(units[0].description.as_deref(), Some("station 1"));
    assert!(!units[3].available);
    assert_eq!(engine.free_units("arena").await, 4);
    assert_eq!(engine.free_units("annex").await, 1);
    assert_eq!(engine.list_resources().await.len(), 6);
    assert!(matches!(
        engine.get_resource("arena", 42).await,
        Err(EngineError::ResourceNotFound(_))
    ));
}

#[tokio::test]
async fn sync_catalog_is_idempotent_and_respects_lazy_admission() {
    let (engine, _) = engine_at("sync.wal", at(8, 0));
    engine.create_reservation(req(1, "alice", at(10, 0), 1)).await.unwrap();
    assert_eq!(engine.resource_count(), 1);

    assert_eq!(engine.sync_catalog().await.unwrap(), 5);
    assert_eq!(engine.sync_catalog().await.unwrap(), 0);
    assert_eq!(engine.resource_count(), 6);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_ledger_and_conflicts() {
    let name = "replay.wal";
    let (engine, clock) = engine_at(name, at(8, 0));
    let kept = engine.create_reservation(req(1, "alice", at(10, 0), 2)).await.unwrap();
    let cancelled = engine.create_reservation(req(2, "bob", at(12, 0), 1)).await.unwrap();
    let done = engine.create_reservation(req(3, "carol", at(8, 0), 1)).await.unwrap();
    engine.cancel_reservation(cancelled.id, "bob").await.unwrap();
    clock.set(at(9, 0));
    engine.sweep_completions().await.unwrap();
    engine.close().await.unwrap();
    drop(engine);

    clock.set(at(10, 30));
    let engine = reopen(name, clock);
    assert_eq!(engine.reservation_count(), 3);
    assert_eq!(engine.get_reservation(&kept.id), Some(kept.clone()));
    assert_eq!(
        engine.get_reservation(&cancelled.id).unwrap().status,
        ReservationStatus::Cancelled
    );
    assert_eq!(
        engine.get_reservation(&done.id).unwrap().status,
        ReservationStatus::Completed
    );
    // Flags are re-derived against the clock at startup.
    assert!(!engine.get_resource("arena", 1).await.unwrap().available);
    assert!(engine.get_resource("arena", 2).await.unwrap().available);

    let clash = engine.create_reservation(req(1, "dave", at(11, 0), 1)).await;
    assert!(matches!(clash, Err(EngineError::SlotUnavailable(id)) if id == kept.id));
    engine.create_reservation(req(2, "dave", at(12, 0), 1)).await.unwrap();
}

#[tokio::test]
async fn compaction_preserves_state_across_restart() {
    let name = "compact_restart.wal";
    let (engine, clock) = engine_at(name, at(8, 0));
    engine.sync_catalog().await.unwrap();
    let mut ids = Vec::new();
    for k in 0..6 {
        let r = engine.create_reservation(req(1, "alice", at(10 + k, 0), 1)).await.unwrap();
        ids.push(r.id);
    }
    for id in &ids[..3] {
        engine.cancel_reservation(*id, "alice").await.unwrap();
    }
    let before: Vec<Reservation> = engine.list_for_holder("alice", false).await.unwrap();

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    engine.close().await.unwrap();
    drop(engine);

    let engine = reopen(name, clock);
    assert_eq!(engine.resource_count(), 6);
    assert_eq!(engine.list_for_holder("alice", false).await.unwrap(), before);
    assert_eq!(engine.list_active("arena", 1).await.unwrap().len(), 3);
}

#[tokio::test]
async fn commits_after_torn_tail_survive_next_restart() {
    use std::io::Write;

    let name = "torn_then_commit.wal";
    let (engine, clock) = engine_at(name, at(8, 0));
    let alice = engine.create_reservation(req(1, "alice", at(10, 0), 1)).await.unwrap();
    engine.close().await.unwrap();
    drop(engine);

    // Crash mid-write: a partial frame at the end of the log.
    let path = std::env::temp_dir().join("deskbook_test_engine").join(name);
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[9u8, 0, 0, 0, 1, 2, 3]).unwrap();
    }

    let engine = reopen(name, clock.clone());
    assert_eq!(engine.get_reservation(&alice.id), Some(alice.clone()));
    let bob = engine.create_reservation(req(1, "bob", at(14, 0), 1)).await.unwrap();
    engine.close().await.unwrap();
    drop(engine);

    let engine = reopen(name, clock);
    assert_eq!(engine.get_reservation(&alice.id), Some(alice));
    assert_eq!(engine.get_reservation(&bob.id), Some(bob.clone()));
    let carol = engine.create_reservation(req(1, "carol", at(14, 0), 1)).await;
    assert!(matches!(carol, Err(EngineError::SlotUnavailable(id)) if id == bob.id));
}

#[test]
fn failed_batch_reports_error_and_leaves_nothing_in_the_log() {
    let path = test_wal_path("failed_batch.wal");
    let registration = |unit: u32, description: Option<String>| Event::ResourceRegistered {
        id: Ulid::new(),
        venue_id: "arena".into(),
        unit,
        description,
    };
    let committed = registration(1, None);
    let mut wal = Wal::open(&path).unwrap();
    wal.append_buffered(&committed).unwrap();
    wal.flush_sync().unwrap();

    let oversized = "x".repeat(crate::limits::MAX_RECORD_BYTES as usize + 1);
    let (tx_ok, mut rx_ok) = oneshot::channel();
    let (tx_big, mut rx_big) = oneshot::channel();
    let mut batch = vec![
        (registration(2, None), tx_ok),
        (registration(3, Some(oversized)), tx_big),
    ];
    commit_batch(&mut wal, &mut batch);

    assert!(rx_ok.try_recv().unwrap().is_err());
    assert!(rx_big.try_recv().unwrap().is_err());
    assert_eq!(wal.appends_since_compact(), 1);

    // The writer keeps working after the rollback.
    let next = registration(4, None);
    wal.append_buffered(&next).unwrap();
    wal.flush_sync().unwrap();
    drop(wal);
    assert_eq!(Wal::replay(&path).unwrap(), vec![committed, next]);
}

#[tokio::test]
async fn closed_engine_fails_with_storage_failure() {
    let (engine, _) = engine_at("closed.wal", at(8, 0));
    engine.sync_catalog().await.unwrap();
    engine.close().await.unwrap();

    let result = engine.create_reservation(req(1, "alice", at(10, 0), 1)).await;
    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::StorageFailure(_)));
    assert!(err.is_retryable());
    // Nothing was applied in memory.
    assert!(engine.list_active("arena", 1).await.unwrap().is_empty());
}
