//! Scheduling engine behavior against the in-memory store

mod common;

use common::{at, Harness, Seed, EVENT_SLUG};
use shiftboard::models::{Actor, Role, TriggerType};
use shiftboard::realtime::{BroadcastKind, Scope};
use shiftboard::scheduler::{CoverageWindow, SchedulerError, ShiftChanges, StaffingLevel};
use shiftboard::storage::Store;

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_rejects_inverted_and_empty_windows() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    for (start, end) in [(at(19, 0), at(18, 0)), (at(19, 0), at(19, 0))] {
        let err = h
            .engine
            .create_shift(EVENT_SLUG, alice, h.seed.bar_shift(&h.seed.alice, start, end))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInput { .. }), "{err}");
    }

    assert!(h.store.all_shifts(h.seed.event.id).await.is_empty());
}

#[tokio::test]
async fn test_rejects_shift_outside_event() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let err = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(22, 30), at(23, 30)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidInput { .. }));
    assert!(h.store.all_shifts(h.seed.event.id).await.is_empty());
}

#[tokio::test]
async fn test_unknown_event_and_team() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);
    let request = h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0));

    let err = h
        .engine
        .create_shift("no-such-event", alice, request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { .. }));

    let mut request = request;
    request.team_id = uuid::Uuid::new_v4();
    let err = h
        .engine
        .create_shift(EVENT_SLUG, alice, request)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { .. }));
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_read_only_is_forbidden_before_event_lookup() {
    let h = Harness::new().await;
    let reed = Seed::actor(&h.seed.reed);

    let err = h
        .engine
        .create_shift(
            "no-such-event",
            reed,
            h.seed.bar_shift(&h.seed.reed, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));
}

#[tokio::test]
async fn test_coverage_summary_rejects_placeholder_accounts() {
    let h = Harness::new().await;
    let placeholder = Actor::new(uuid::Uuid::new_v4(), Role::Dummy);

    let err = h
        .engine
        .coverage_summary(EVENT_SLUG, placeholder, h.seed.bar.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    let summary = h
        .engine
        .coverage_summary(EVENT_SLUG, Seed::actor(&h.seed.reed), h.seed.bar.id)
        .await
        .unwrap();
    assert_eq!(summary.len(), 1);
}

#[tokio::test]
async fn test_user_may_only_schedule_themselves() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let err = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.bob, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    // Event administrators may schedule anyone
    let erin = Seed::actor(&h.seed.erin);
    h.engine
        .create_shift(
            EVENT_SLUG,
            erin,
            h.seed.bar_shift(&h.seed.bob, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_user_cannot_touch_foreign_shift() {
    let h = Harness::new().await;
    let bob = Seed::actor(&h.seed.bob);
    let alice = Seed::actor(&h.seed.alice);

    let created = h
        .engine
        .create_shift(
            EVENT_SLUG,
            bob,
            h.seed.bar_shift(&h.seed.bob, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
    let id = created.shift.shift.id;

    let err = h
        .engine
        .update_shift(
            EVENT_SLUG,
            alice,
            id,
            ShiftChanges {
                end: Some(at(12, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    let err = h.engine.delete_shift(EVENT_SLUG, alice, id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    assert_eq!(h.store.all_shifts(h.seed.event.id).await.len(), 1);
}

#[tokio::test]
async fn test_reassignment_requires_admin() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let created = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
    let id = created.shift.shift.id;

    // Owner passes the ownership check but still may not hand the shift over
    let reassign = ShiftChanges {
        assignee_id: Some(h.seed.bob.id),
        ..Default::default()
    };
    let err = h
        .engine
        .update_shift(EVENT_SLUG, alice, id, reassign.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    let erin = Seed::actor(&h.seed.erin);
    let outcome = h
        .engine
        .update_shift(EVENT_SLUG, erin, id, reassign)
        .await
        .unwrap();
    assert_eq!(outcome.shift.shift.assignee_id, h.seed.bob.id);
    assert_eq!(outcome.shift.assignee_name, "Bob");
}

#[tokio::test]
async fn test_locked_event_rejects_everyone_but_super_admin() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);
    let erin = Seed::actor(&h.seed.erin);
    let root = Seed::actor(&h.seed.root);

    let created = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
    let id = created.shift.shift.id;

    h.engine.set_event_lock(EVENT_SLUG, erin, true).await.unwrap();
    let before = h.store.all_shifts(h.seed.event.id).await;

    // Own shift, event admin or not: the lock wins
    for actor in [alice, erin] {
        let err = h
            .engine
            .create_shift(
                EVENT_SLUG,
                actor,
                h.seed.bar_shift(&h.seed.alice, at(12, 0), at(13, 0)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Forbidden { .. }));
        assert_eq!(err.public_message(), "event is locked");

        let err = h
            .engine
            .update_shift(
                EVENT_SLUG,
                actor,
                id,
                ShiftChanges {
                    end: Some(at(12, 0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Forbidden { .. }));

        let err = h.engine.delete_shift(EVENT_SLUG, actor, id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Forbidden { .. }));
    }

    assert_eq!(h.store.all_shifts(h.seed.event.id).await, before);

    // The same delete from the super-admin goes through
    h.engine.delete_shift(EVENT_SLUG, root, id).await.unwrap();
    assert!(h.store.all_shifts(h.seed.event.id).await.is_empty());
}

#[tokio::test]
async fn test_only_admins_toggle_lock() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let err = h
        .engine
        .set_event_lock(EVENT_SLUG, alice, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));
    assert!(!h.store.event(h.seed.event.id).await.unwrap().is_locked);
}

// ============================================================================
// Overlap warnings
// ============================================================================

#[tokio::test]
async fn test_overlap_warns_but_commits() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let first = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(12, 0)),
        )
        .await
        .unwrap();
    assert!(first.warnings.is_empty());

    let second = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(11, 0), at(13, 0)),
        )
        .await
        .unwrap();

    assert_eq!(second.warnings.len(), 1);
    assert_eq!(
        second.warnings[0],
        "Alice is already scheduled for Bar (Jan 15, 10:00 – 12:00)"
    );
    assert_eq!(h.store.all_shifts(h.seed.event.id).await.len(), 2);
}

#[tokio::test]
async fn test_adjacent_shifts_do_not_warn() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    h.engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
    let next = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(11, 0), at(12, 0)),
        )
        .await
        .unwrap();
    assert!(next.warnings.is_empty());
}

#[tokio::test]
async fn test_update_does_not_warn_about_itself() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);

    let created = h
        .engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();

    let updated = h
        .engine
        .update_shift(
            EVENT_SLUG,
            alice,
            created.shift.shift.id,
            ShiftChanges {
                end: Some(at(11, 30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.warnings.is_empty());
    assert_eq!(updated.shift.shift.end, at(11, 30));
}

// ============================================================================
// Staffing limits
// ============================================================================

#[tokio::test]
async fn test_full_team_rejects_ordinary_user_only() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);
    let bob = Seed::actor(&h.seed.bob);
    let erin = Seed::actor(&h.seed.erin);

    h.engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(18, 0), at(19, 0)),
        )
        .await
        .unwrap();

    let err = h
        .engine
        .create_shift(
            EVENT_SLUG,
            bob,
            h.seed.bar_shift(&h.seed.bob, at(18, 30), at(19, 30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict { .. }));
    assert_eq!(err.public_message(), "team fully staffed for this period");

    // Event admin overbooks
    h.engine
        .create_shift(
            EVENT_SLUG,
            erin,
            h.seed.bar_shift(&h.seed.bob, at(18, 30), at(19, 30)),
        )
        .await
        .unwrap();

    let summary = h
        .engine
        .coverage_summary(EVENT_SLUG, Seed::actor(&h.seed.reed), h.seed.bar.id)
        .await
        .unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].current, 2);
    assert_eq!(summary[0].level, StaffingLevel::Overstaffed);
}

#[tokio::test]
async fn test_shift_outside_requirement_is_unrestricted() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);
    let bob = Seed::actor(&h.seed.bob);

    h.engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(18, 0), at(19, 0)),
        )
        .await
        .unwrap();

    // Starts exactly when the requirement ends
    h.engine
        .create_shift(
            EVENT_SLUG,
            bob,
            h.seed.bar_shift(&h.seed.bob, at(20, 0), at(21, 0)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_creates_respect_staffing_limit() {
    let h = std::sync::Arc::new(Harness::new().await);

    let mut tasks = Vec::new();
    for user in [h.seed.alice.clone(), h.seed.bob.clone()] {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.engine
                .create_shift(
                    EVENT_SLUG,
                    Seed::actor(&user),
                    h.seed.bar_shift(&user, at(18, 0), at(19, 0)),
                )
                .await
        }));
    }

    let results = futures::future::join_all(tasks).await;
    let committed = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(committed, 1);
    assert_eq!(h.store.all_shifts(h.seed.event.id).await.len(), 1);
}

// ============================================================================
// Coverage replacement
// ============================================================================

#[tokio::test]
async fn test_replace_coverage() {
    let h = Harness::new().await;
    let erin = Seed::actor(&h.seed.erin);
    let alice = Seed::actor(&h.seed.alice);

    let err = h
        .engine
        .replace_coverage(EVENT_SLUG, alice, h.seed.bar.id, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Forbidden { .. }));

    let err = h
        .engine
        .replace_coverage(
            EVENT_SLUG,
            erin,
            h.seed.bar.id,
            vec![CoverageWindow {
                start: at(8, 0),
                end: at(10, 0),
                required: 1,
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidInput { .. }));

    let requirements = h
        .engine
        .replace_coverage(
            EVENT_SLUG,
            erin,
            h.seed.bar.id,
            vec![
                CoverageWindow {
                    start: at(10, 0),
                    end: at(12, 0),
                    required: 2,
                },
                CoverageWindow {
                    start: at(12, 0),
                    end: at(14, 0),
                    required: 1,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(requirements.len(), 2);

    // The old 18:00-20:00 requirement is gone
    let summary = h
        .engine
        .coverage_summary(EVENT_SLUG, Seed::actor(&h.seed.reed), h.seed.bar.id)
        .await
        .unwrap();
    assert_eq!(summary.len(), 2);
    assert!(summary
        .iter()
        .all(|s| s.level == StaffingLevel::Understaffed));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_bar_evening_scenario() {
    let h = Harness::new().await;
    let mut grid = h.broker().subscribe(Scope::event(EVENT_SLUG)).unwrap();

    let alice = Seed::actor(&h.seed.alice);
    let bob = Seed::actor(&h.seed.bob);
    let root = Seed::actor(&h.seed.root);

    h.engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(18, 0), at(19, 0)),
        )
        .await
        .unwrap();
    let summary = h
        .engine
        .coverage_summary(EVENT_SLUG, Seed::actor(&h.seed.reed), h.seed.bar.id)
        .await
        .unwrap();
    assert_eq!((summary[0].current, summary[0].requirement.required), (1, 1));
    let first = grid.recv().await.unwrap();
    assert_eq!(first.kind, BroadcastKind::ShiftCreated);

    let err = h
        .engine
        .create_shift(
            EVENT_SLUG,
            bob,
            h.seed.bar_shift(&h.seed.bob, at(18, 30), at(19, 30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Conflict { .. }));
    assert!(grid.try_recv().is_none());

    let outcome = h
        .engine
        .create_shift(
            EVENT_SLUG,
            root,
            h.seed.bar_shift(&h.seed.root, at(18, 30), at(19, 30)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.shift.team_name, "Bar");

    let summary = h
        .engine
        .coverage_summary(EVENT_SLUG, Seed::actor(&h.seed.reed), h.seed.bar.id)
        .await
        .unwrap();
    assert_eq!((summary[0].current, summary[0].requirement.required), (2, 1));

    let broadcast = grid.recv().await.unwrap();
    assert_eq!(broadcast.kind, BroadcastKind::ShiftCreated);
    assert_eq!(broadcast.event_id, Some(h.seed.event.id));

    h.drain().await;

    // Alice hears about the super-admin's shift; the actor does not
    let alice_inbox = h.store.notifications_for(h.seed.alice.id).await.unwrap();
    let created: Vec<_> = alice_inbox
        .iter()
        .filter(|n| n.trigger == TriggerType::ShiftCreated)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].title, "New shift in LAN 2025");
    assert!(h.store.notifications_for(h.seed.root.id).await.unwrap().is_empty());
    assert!(h.store.notifications_for(h.seed.bob.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_toggle_twice() {
    let h = Harness::new().await;
    let mut grid = h.broker().subscribe(Scope::event(EVENT_SLUG)).unwrap();
    let root = Seed::actor(&h.seed.root);

    let mut seen = Vec::new();
    for _ in 0..2 {
        let locked = h.engine.set_event_lock(EVENT_SLUG, root, true).await.unwrap();
        assert!(locked.is_locked);
        seen.push(grid.recv().await.unwrap());

        let unlocked = h.engine.set_event_lock(EVENT_SLUG, root, false).await.unwrap();
        assert!(!unlocked.is_locked);
        seen.push(grid.recv().await.unwrap());
    }

    let kinds: Vec<_> = seen.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            BroadcastKind::EventLocked,
            BroadcastKind::EventUnlocked,
            BroadcastKind::EventLocked,
            BroadcastKind::EventUnlocked,
        ]
    );
    for pair in seen.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    // Already unlocked: no state change, no broadcast
    h.engine.set_event_lock(EVENT_SLUG, root, false).await.unwrap();
    assert!(grid.try_recv().is_none());
}

#[tokio::test]
async fn test_notification_preference_opt_out() {
    let h = Harness::new().await;
    let alice = Seed::actor(&h.seed.alice);
    let root = Seed::actor(&h.seed.root);

    h.engine
        .create_shift(
            EVENT_SLUG,
            alice,
            h.seed.bar_shift(&h.seed.alice, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();

    h.store
        .set_preference(
            h.seed.alice.id,
            TriggerType::ShiftCreated,
            shiftboard::models::NotificationChannel::InApp,
            false,
        )
        .await;

    h.engine
        .create_shift(
            EVENT_SLUG,
            root,
            h.seed.bar_shift(&h.seed.root, at(10, 0), at(11, 0)),
        )
        .await
        .unwrap();
    h.engine.set_event_lock(EVENT_SLUG, root, true).await.unwrap();

    h.drain().await;

    let inbox = h.store.notifications_for(h.seed.alice.id).await.unwrap();
    let triggers: Vec<_> = inbox.iter().map(|n| n.trigger).collect();
    assert_eq!(triggers, vec![TriggerType::EventLocked]);
}
