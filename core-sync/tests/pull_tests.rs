//! Pull pass behaviour against in-memory pipeline and editor doubles.

mod common;

use bridge_traits::editor::EditorBridge;
use bridge_traits::error::BridgeError;
use common::*;
use core_async::sync::CancellationToken;
use core_pipeline::{Fingerprint, RepresentationId};
use std::sync::{Arc, Mutex};
use core_runtime::events::{AssetEvent, CoreEvent, IndexEvent, SyncEvent};
use core_sync::planner::{
    REASON_KEPT_LOCAL, REASON_LOCAL_PENDING, REASON_RELINKED, REASON_UP_TO_DATE,
};
use core_sync::{
    ActionOutcome, AssetStatus, ConflictResolution, PassId, Resolutions, SyncError, SyncReport,
};

async fn pull(fixture: &Fixture) -> SyncReport {
    pull_with(fixture, &Resolutions::new()).await
}

async fn pull_with(fixture: &Fixture, resolutions: &Resolutions) -> SyncReport {
    fixture
        .engine
        .pull(PassId::new(), &scope(), resolutions, &CancellationToken::new())
        .await
        .expect("pull succeeds")
}

fn outcome<'a>(report: &'a SyncReport, rep: &str) -> &'a ActionOutcome {
    &report
        .actions
        .iter()
        .find(|a| a.representation_id.as_str() == rep)
        .unwrap_or_else(|| panic!("no action for {}", rep))
        .outcome
}

/// heroModel v1 (R1, "abc") pulled once.
async fn hero_pulled() -> Fixture {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    let report = pull(&fixture).await;
    assert_eq!(report.stats().imported, 1);
    fixture
}

#[core_async::test]
async fn test_first_pull_imports_latest_version() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);

    let report = pull(&fixture).await;

    assert_eq!(report.actions.len(), 1);
    assert!(matches!(
        outcome(&report, "R2"),
        ActionOutcome::Imported { local_path, .. } if local_path == &destination("heroModel", 2)
    ));
    assert_eq!(fixture.editor.imports(), vec!["R2".to_string()]);

    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.identity, identity("heroModel", 2));
    assert_eq!(record.fingerprint, Fingerprint::new("def"));
    assert_eq!(record.local_fingerprint, Fingerprint::new("def"));
}

#[core_async::test]
async fn test_second_pull_without_changes_only_skips() {
    let fixture = hero_pulled().await;
    fixture.pipeline.publish("rig", "RR1", "rrr", &[]);
    fixture.engine.invalidate(&scope()).await;
    pull(&fixture).await;

    let report = pull(&fixture).await;

    assert_eq!(report.actions.len(), 2);
    assert_eq!(report.non_skipped().count(), 0);
    assert!(report
        .actions
        .iter()
        .all(|a| a.outcome == ActionOutcome::skipped(REASON_UP_TO_DATE)));
    assert_eq!(fixture.editor.imports().len(), 2);
}

#[core_async::test]
async fn test_new_version_reimports_in_place() {
    let fixture = hero_pulled().await;
    let local_path = destination("heroModel", 1);

    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.engine.invalidate(&scope()).await;

    let report = pull(&fixture).await;

    assert_eq!(report.actions.len(), 1);
    assert!(matches!(
        outcome(&report, "R2"),
        ActionOutcome::Imported { local_path: path, .. } if path == &local_path
    ));
    assert_eq!(fixture.editor.fingerprint(&local_path).as_deref(), Some("def"));
    assert_eq!(fixture.editor.paths(), vec![local_path.clone()]);

    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.representation_id, RepresentationId::new("R2"));
    assert_eq!(record.local_path, local_path);
    assert_eq!(record.fingerprint, Fingerprint::new("def"));
    assert_eq!(fixture.index.len().await, 1);
}

#[core_async::test]
async fn test_shared_local_asset_is_ambiguous_and_nothing_applies() {
    let fixture = hero_pulled().await;
    // A second fbx representation of the same version claims the same slot.
    fixture
        .pipeline
        .representation("R1b", "ver-heroModel-1", "xyz", &[]);
    fixture
        .pipeline
        .publish("rig", "RR1", "rrr", &[]);
    fixture.engine.invalidate(&scope()).await;
    let before = fixture.index.snapshot().await;
    let mut rx = fixture.subscribe();

    let err = fixture
        .engine
        .pull(PassId::new(), &scope(), &Resolutions::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SyncError::IdentityAmbiguity {
            local_path,
            candidates,
        } => {
            assert_eq!(local_path, destination("heroModel", 1));
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fixture.editor.imports(), vec!["R1".to_string()]);
    assert_eq!(fixture.index.snapshot().await, before);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Failed { .. }))));
    assert!(!events.iter().any(|e| matches!(e, CoreEvent::Asset(_))));
}

#[core_async::test]
async fn test_diverged_asset_is_left_untouched() {
    let fixture = hero_pulled().await;
    let local_path = destination("heroModel", 1);
    fixture.editor.edit(&local_path, "sculpted");
    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.engine.invalidate(&scope()).await;

    let report = pull(&fixture).await;

    assert_eq!(
        outcome(&report, "R2"),
        &ActionOutcome::Conflicted {
            local_fingerprint: Fingerprint::new("sculpted"),
            remote_fingerprint: Fingerprint::new("def"),
        }
    );
    assert_eq!(
        fixture.editor.fingerprint(&local_path).as_deref(),
        Some("sculpted")
    );
    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.representation_id, RepresentationId::new("R1"));
}

#[core_async::test]
async fn test_local_edit_without_remote_change_is_pending_publish() {
    let fixture = hero_pulled().await;
    fixture
        .editor
        .edit(&destination("heroModel", 1), "sculpted");

    let report = pull(&fixture).await;

    assert_eq!(
        outcome(&report, "R1"),
        &ActionOutcome::skipped(REASON_LOCAL_PENDING)
    );
    assert_eq!(fixture.editor.imports().len(), 1);
}

#[core_async::test]
async fn test_keep_local_rebaselines_remote_only() {
    let fixture = hero_pulled().await;
    let local_path = destination("heroModel", 1);
    fixture.editor.edit(&local_path, "sculpted");
    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.engine.invalidate(&scope()).await;

    let mut resolutions = Resolutions::new();
    resolutions.insert(lineage("heroModel"), ConflictResolution::KeepLocal);
    let report = pull_with(&fixture, &resolutions).await;

    assert_eq!(outcome(&report, "R2"), &ActionOutcome::skipped(REASON_KEPT_LOCAL));
    assert_eq!(
        fixture.editor.fingerprint(&local_path).as_deref(),
        Some("sculpted")
    );
    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.representation_id, RepresentationId::new("R2"));
    assert_eq!(record.fingerprint, Fingerprint::new("def"));
    assert_eq!(record.local_fingerprint, Fingerprint::new("abc"));

    // Without a resolution the edit is now just waiting to be published.
    let report = pull(&fixture).await;
    assert_eq!(
        outcome(&report, "R2"),
        &ActionOutcome::skipped(REASON_LOCAL_PENDING)
    );
}

#[core_async::test]
async fn test_take_remote_overwrites_local_edit() {
    let fixture = hero_pulled().await;
    let local_path = destination("heroModel", 1);
    fixture.editor.edit(&local_path, "sculpted");
    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.engine.invalidate(&scope()).await;

    let mut resolutions = Resolutions::new();
    resolutions.insert(lineage("heroModel"), ConflictResolution::TakeRemote);
    let report = pull_with(&fixture, &resolutions).await;

    assert!(matches!(outcome(&report, "R2"), ActionOutcome::Imported { .. }));
    assert_eq!(fixture.editor.fingerprint(&local_path).as_deref(), Some("def"));
}

#[core_async::test]
async fn test_dependencies_import_first() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R-hero", "abc", &["R-rig"]);
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &["R-skel"]);
    fixture.pipeline.publish("skeleton", "R-skel", "skl", &[]);

    let report = pull(&fixture).await;

    assert_eq!(report.stats().imported, 3);
    assert_eq!(
        fixture.editor.imports(),
        vec!["R-skel".to_string(), "R-rig".into(), "R-hero".into()]
    );
}

#[core_async::test]
async fn test_dependency_outside_scope_is_pulled_along() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R-hero", "abc", &["R-rig"]);
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &[]);

    let report = fixture
        .engine
        .pull(
            PassId::new(),
            &scope().with_products(["heroModel"]),
            &Resolutions::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats().imported, 2);
    assert_eq!(
        fixture.editor.imports(),
        vec!["R-rig".to_string(), "R-hero".into()]
    );
}

#[core_async::test]
async fn test_cyclic_group_fails_without_blocking_others() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("propA", "R-a", "aaa", &["R-b"]);
    fixture.pipeline.publish("propB", "R-b", "bbb", &["R-a"]);
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);

    let report = pull(&fixture).await;

    for rep in ["R-a", "R-b"] {
        match outcome(&report, rep) {
            ActionOutcome::Failed { reason } => assert!(reason.contains("cyclic dependency")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!(matches!(outcome(&report, "R1"), ActionOutcome::Imported { .. }));
    assert_eq!(fixture.editor.imports(), vec!["R1".to_string()]);
}

#[core_async::test]
async fn test_unknown_dependency_fails_the_dependent() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &["R-ghost"]);

    let report = pull(&fixture).await;

    assert_eq!(
        outcome(&report, "R1"),
        &ActionOutcome::failed("unknown dependency R-ghost")
    );
    assert!(fixture.editor.imports().is_empty());
}

#[core_async::test]
async fn test_failed_dependency_blocks_dependents() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R-hero", "abc", &["R-rig"]);
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &[]);
    fixture
        .editor
        .fail_import("R-rig", BridgeError::OperationFailed("unsupported skin".into()));
    let mut rx = fixture.subscribe();

    let report = pull(&fixture).await;

    assert!(matches!(outcome(&report, "R-rig"), ActionOutcome::Failed { .. }));
    assert_eq!(
        outcome(&report, "R-hero"),
        &ActionOutcome::DependencyFailed {
            dependency: identity("heroRig", 1),
        }
    );
    assert_eq!(fixture.editor.attempts("R-rig"), 1);
    assert_eq!(fixture.editor.attempts("R-hero"), 0);
    assert!(fixture.index.is_empty().await);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Asset(AssetEvent::DependencyFailed { dependency, .. })
            if dependency == &identity("heroRig", 1).to_string()
    )));
}

#[core_async::test]
async fn test_transient_import_failures_are_retried() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture
        .editor
        .fail_import("R1", BridgeError::Transient("editor busy".into()));
    fixture
        .editor
        .fail_import("R1", BridgeError::Timeout("import".into()));

    let report = pull(&fixture).await;

    let action = &report.actions[0];
    assert!(matches!(action.outcome, ActionOutcome::Imported { .. }));
    assert_eq!(action.attempts, 3);
}

#[core_async::test]
async fn test_retries_stop_after_three_attempts() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    for _ in 0..3 {
        fixture
            .editor
            .fail_import("R1", BridgeError::Transient("editor busy".into()));
    }

    let report = pull(&fixture).await;

    let action = &report.actions[0];
    assert!(matches!(action.outcome, ActionOutcome::Failed { .. }));
    assert_eq!(action.attempts, 3);
    assert_eq!(fixture.editor.attempts("R1"), 3);
}

#[core_async::test]
async fn test_hard_import_failure_is_not_retried() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture
        .editor
        .fail_import("R1", BridgeError::OperationFailed("bad mesh".into()));

    let report = pull(&fixture).await;

    assert_eq!(report.actions[0].attempts, 1);
    assert_eq!(fixture.editor.attempts("R1"), 1);
}

#[core_async::test]
async fn test_cancellation_stops_undispatched_actions() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R-hero", "abc", &["R-rig"]);
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &[]);
    let token = CancellationToken::new();
    fixture.editor.cancel_after_import("R-rig", token.clone());
    let mut rx = fixture.subscribe();

    let report = fixture
        .engine
        .pull(PassId::new(), &scope(), &Resolutions::new(), &token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(matches!(outcome(&report, "R-rig"), ActionOutcome::Imported { .. }));
    assert_eq!(outcome(&report, "R-hero"), &ActionOutcome::Cancelled);
    assert_eq!(report.actions[1].attempts, 0);
    assert_eq!(fixture.editor.imports(), vec!["R-rig".to_string()]);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Sync(SyncEvent::Cancelled {
            completed_actions: 1,
            cancelled_actions: 1,
            ..
        })
    )));
}

#[core_async::test]
async fn test_deleted_local_asset_is_imported_again() {
    let fixture = hero_pulled().await;
    fixture.editor.delete(&destination("heroModel", 1));

    let report = pull(&fixture).await;

    assert!(matches!(outcome(&report, "R1"), ActionOutcome::Imported { .. }));
    assert_eq!(fixture.index.len().await, 1);
    assert_eq!(fixture.editor.imports(), vec!["R1".to_string(), "R1".into()]);
}

#[core_async::test]
async fn test_lost_index_relinks_from_import_manifest() {
    let fixture = hero_pulled().await;
    fixture.index.remove(&lineage("heroModel")).await.unwrap();

    let report = pull(&fixture).await;

    assert_eq!(
        outcome(&report, "R1"),
        &ActionOutcome::skipped(REASON_RELINKED)
    );
    assert_eq!(fixture.editor.imports().len(), 1);
    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.local_path, destination("heroModel", 1));
    assert_eq!(record.representation_id, RepresentationId::new("R1"));

    let report = pull(&fixture).await;
    assert_eq!(
        outcome(&report, "R1"),
        &ActionOutcome::skipped(REASON_UP_TO_DATE)
    );
}

#[core_async::test]
async fn test_metadata_is_refetched_after_ttl() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);

    pull(&fixture).await;
    pull(&fixture).await;
    assert_eq!(fixture.pipeline.list_calls(), 1);

    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.clock.advance(std::time::Duration::from_secs(299));
    let report = pull(&fixture).await;
    assert_eq!(fixture.pipeline.list_calls(), 1);
    assert!(report.actions[0].outcome.is_skipped());

    fixture.clock.advance(std::time::Duration::from_secs(1));
    let report = pull(&fixture).await;
    assert_eq!(fixture.pipeline.list_calls(), 2);
    assert!(matches!(outcome(&report, "R2"), ActionOutcome::Imported { .. }));
}

#[core_async::test]
async fn test_invalidate_forces_refetch_and_notifies() {
    let fixture = hero_pulled().await;
    let mut rx = fixture.subscribe();

    fixture.engine.invalidate(&scope()).await;
    pull(&fixture).await;

    assert_eq!(fixture.pipeline.list_calls(), 2);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CoreEvent::Index(IndexEvent::Invalidated { project_id }) if project_id == PROJECT
    )));
}

#[core_async::test]
async fn test_transient_listing_failure_is_retried() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture
        .pipeline
        .fail_next_list(BridgeError::Transient("502".into()));

    let report = pull(&fixture).await;

    assert_eq!(report.stats().imported, 1);
    assert_eq!(fixture.pipeline.list_calls(), 2);
}

#[core_async::test]
async fn test_malformed_listing_aborts_the_pass() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture.pipeline.version("ver-broken", "prod-heroModel", 0, "wip");

    let err = fixture
        .engine
        .pull(PassId::new(), &scope(), &Resolutions::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MalformedEntity { .. }));
    assert!(fixture.editor.imports().is_empty());
}

#[core_async::test]
async fn test_events_cover_every_action() {
    let fixture = Fixture::new();
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &[]);
    let mut rx = fixture.subscribe();
    let pass_id = PassId::new();

    fixture
        .engine
        .pull(pass_id, &scope(), &Resolutions::new(), &CancellationToken::new())
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(CoreEvent::Sync(SyncEvent::Started { planned_actions: 2, .. }))
    ));
    assert!(matches!(
        events.last(),
        Some(CoreEvent::Sync(SyncEvent::Completed { imported: 2, .. }))
    ));
    let imported: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Asset(asset @ AssetEvent::Imported { .. }) => Some(asset.identity()),
            _ => None,
        })
        .collect();
    assert_eq!(imported.len(), 2);
    let pass = pass_id.to_string();
    assert!(events
        .iter()
        .all(|e| e.pass_id() == Some(pass.as_str())));
}

#[core_async::test]
async fn test_inventory_reports_status_per_asset() {
    let fixture = hero_pulled().await;
    fixture.pipeline.publish("heroRig", "R-rig", "rig", &[]);
    fixture.engine.invalidate(&scope()).await;
    pull(&fixture).await;

    fixture.editor.put("Scratch/notes.txt", b"todo");
    fixture
        .editor
        .edit(&destination("heroRig", 1), "rigged");
    fixture
        .pipeline
        .publish_version("heroModel", 2, "R2", "def", &[]);
    fixture.engine.invalidate(&scope()).await;

    let items = fixture.engine.inventory(&scope()).await.unwrap();
    let status_of = |path: &str| {
        items
            .iter()
            .find(|i| i.local.path == path)
            .map(|i| (i.status, i.latest_version))
    };

    assert_eq!(
        status_of(&destination("heroModel", 1)),
        Some((AssetStatus::Outdated, Some(2)))
    );
    assert_eq!(
        status_of(&destination("heroRig", 1)),
        Some((AssetStatus::Modified, Some(1)))
    );
    assert_eq!(
        status_of("Scratch/notes.txt"),
        Some((AssetStatus::Untracked, None))
    );

    fixture.pipeline.remove("R-rig");
    fixture.engine.invalidate(&scope()).await;
    let items = fixture.engine.inventory(&scope()).await.unwrap();
    let rig = items
        .iter()
        .find(|i| i.local.path == destination("heroRig", 1))
        .unwrap();
    assert_eq!(rig.status, AssetStatus::Orphaned);

    let narrowed = fixture
        .engine
        .inventory(&scope().with_products(["heroModel"]))
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 1);
}

#[core_async::test]
async fn test_remove_local_asset_drops_its_record() {
    let fixture = hero_pulled().await;
    let local_path = destination("heroModel", 1);

    let removed = fixture.engine.remove_local_asset(&local_path).await.unwrap();

    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].identity, identity("heroModel", 1));
    assert!(fixture.editor.paths().is_empty());
    assert!(fixture.index.is_empty().await);

    // Removing again is harmless.
    assert!(fixture
        .engine
        .remove_local_asset(&local_path)
        .await
        .unwrap()
        .is_empty());
}

#[core_async::test]
async fn test_import_that_landed_before_timeout_is_kept_on_retry() {
    let config = test_config().with_action_timeout(std::time::Duration::from_millis(50));
    let fixture = Fixture::with_editor(config, |editor| {
        Arc::new(LateAnsweringEditor::new(
            editor,
            std::time::Duration::from_millis(300),
        )) as Arc<dyn EditorBridge>
    });
    fixture.pipeline.publish("heroModel", "R1", "abc", &[]);
    fixture.pipeline.publish("heroRig", "R-rig", "rrr", &["R1"]);

    let report = pull(&fixture).await;

    let model = report
        .actions
        .iter()
        .find(|a| a.representation_id.as_str() == "R1")
        .unwrap();
    assert!(matches!(
        &model.outcome,
        ActionOutcome::Imported { local_path, .. } if local_path == &destination("heroModel", 1)
    ));
    assert_eq!(model.attempts, 2);
    assert!(matches!(
        outcome(&report, "R-rig"),
        ActionOutcome::Imported { .. }
    ));

    let mut paths = fixture.editor.paths();
    paths.sort();
    assert_eq!(
        paths,
        vec![destination("heroModel", 1), destination("heroRig", 1)]
    );
    let record = fixture.index.get(&lineage("heroModel")).await.unwrap();
    assert_eq!(record.local_path, destination("heroModel", 1));
}

#[core_async::test]
async fn test_parallel_imports_never_exceed_the_limit() {
    let counting = Arc::new(Mutex::new(None::<Arc<ConcurrencyCountingEditor>>));
    let slot = counting.clone();
    let fixture = Fixture::with_editor(test_config().with_max_parallelism(2), move |editor| {
        let wrapped = Arc::new(ConcurrencyCountingEditor::new(editor));
        *slot.lock().unwrap() = Some(wrapped.clone());
        wrapped as Arc<dyn EditorBridge>
    });
    fixture
        .editor
        .set_import_delay(std::time::Duration::from_millis(20));
    for n in 0..8 {
        fixture.pipeline.publish(
            &format!("prop{}", n),
            &format!("R-prop{}", n),
            &format!("fp{}", n),
            &[],
        );
    }

    let report = pull(&fixture).await;

    assert_eq!(report.stats().imported, 8);
    let peak = counting.lock().unwrap().as_ref().unwrap().peak();
    assert_eq!(peak, 2);
}
