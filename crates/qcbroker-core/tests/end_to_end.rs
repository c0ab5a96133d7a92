//! End-to-end scenarios against the in-memory `testutil` store: submit-and-compute, deduplication, heartbeat loss, tag priority,
//! service iteration, and cancel/uncancel.

use std::collections::BTreeMap;
use std::sync::Arc;

use qcbroker_core::manager_service::ManagerService;
use qcbroker_core::ports::{RecordStore, TaskQueuePort};
use qcbroker_core::queue_service::QueueService;
use qcbroker_core::record_service::RecordService;
use qcbroker_core::runner::JobRunner;
use qcbroker_core::service_engine::ServiceEngine;
use qcbroker_core::settings::ServerConfig;
use qcbroker_core::status::StatusEvent;
use qcbroker_core::testutil::InMemoryStore;
use qcbroker_core::variants;
use qcbroker_types::{
    Driver, KeywordSet, Molecule, MoleculeIdentifiers, OptimizationSpec, Priority, RecordOutputs,
    RecordStatus, RegisterManagerRequest, ServiceSpec, SinglepointSpec, Specification, TaskReturn,
};
use serde_json::json;

fn water() -> Molecule {
    Molecule {
        symbols: vec!["O".into(), "H".into(), "H".into()],
        geometry: vec![0.0, 0.0, -0.12, 0.0, 1.43, 0.96, 0.0, -1.43, 0.96],
        masses: None,
        molecular_charge: 0.0,
        molecular_multiplicity: 1,
        real_atoms: None,
        fragments: None,
        fragment_charges: None,
        fragment_multiplicities: None,
        connectivity: None,
        identifiers: MoleculeIdentifiers::default(),
    }
}

fn singlepoint_spec() -> SinglepointSpec {
    SinglepointSpec {
        program: "psi4".into(),
        driver: Driver::Energy,
        method: "hf".into(),
        basis: Some("sto-3g".into()),
        keywords: KeywordSet::default(),
        protocols: Default::default(),
    }
}

fn optimization_spec() -> OptimizationSpec {
    OptimizationSpec {
        program: "geometric".into(),
        keywords: KeywordSet::default(),
        singlepoint_specification: singlepoint_spec(),
        protocols: Default::default(),
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    records: Arc<RecordService>,
    queue: Arc<QueueService>,
    managers: Arc<ManagerService>,
    runner: Arc<JobRunner>,
    config: ServerConfig,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();

    let records = Arc::new(RecordService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    ));
    let queue = Arc::new(QueueService::new(store.clone(), store.clone(), store.clone()));
    let managers = Arc::new(ManagerService::new(store.clone()));

    let service_engine = Arc::new(ServiceEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        records.clone(),
        variants::default_registry(),
    ));

    let config = ServerConfig::default();
    let runner = Arc::new(JobRunner::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        service_engine,
        records.clone(),
        config.clone(),
    ));

    Harness {
        store,
        records,
        queue,
        managers,
        runner,
        config,
    }
}

async fn register_manager(h: &Harness, name: &str, tags: &[&str], programs: BTreeMap<String, String>) {
    h.managers
        .register(
            RegisterManagerRequest {
                name: name.to_string(),
                cluster: "local".into(),
                hostname: "host-1".into(),
                version: "1.0".into(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                programs,
            },
            &h.config,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn submit_claim_and_compute_single_record() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();

    let outcome = h
        .records
        .add_records(
            &[molecule_id],
            &Specification::Singlepoint(singlepoint_spec()),
            "default",
            Priority::Normal,
            Some("alice"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.inserted_idx, vec![0]);
    let record_id = outcome.ids[0];

    let rows = h.records.get_records(&[record_id], false).await.unwrap();
    assert_eq!(rows[0].as_ref().unwrap().status, RecordStatus::Waiting);

    register_manager(
        &h,
        "mgr-1",
        &["default"],
        BTreeMap::from([("psi4".to_string(), "1.9".to_string())]),
    )
    .await;

    let claimed = h
        .queue
        .claim(
            "mgr-1",
            &["default".to_string()],
            &BTreeMap::from([("psi4".to_string(), "1.9".to_string())]),
            10,
        )
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].record_id, record_id);

    let rows = h.records.get_records(&[record_id], false).await.unwrap();
    assert_eq!(rows[0].as_ref().unwrap().status, RecordStatus::Running);

    let mut results = BTreeMap::new();
    results.insert(
        record_id,
        TaskReturn::Success {
            return_result: json!(-75.9),
        },
    );
    let outcome = h.queue.apply_returns("mgr-1", results).await.unwrap();
    assert_eq!(outcome.accepted.get(&record_id), Some(&true));

    let rows = h.records.get_records(&[record_id], false).await.unwrap();
    let row = rows[0].as_ref().unwrap();
    assert_eq!(row.status, RecordStatus::Complete);
    assert_eq!(row.outputs.return_result, Some(-75.9));
}

#[tokio::test]
async fn resubmitting_identical_spec_and_molecule_deduplicates() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();
    let spec = Specification::Singlepoint(singlepoint_spec());

    let first = h
        .records
        .add_records(&[molecule_id], &spec, "default", Priority::Normal, None)
        .await
        .unwrap();
    let second = h
        .records
        .add_records(&[molecule_id], &spec, "default", Priority::Normal, None)
        .await
        .unwrap();

    assert_eq!(first.inserted_idx, vec![0]);
    assert_eq!(second.existing_idx, vec![0]);
    assert_eq!(first.ids, second.ids);
}

#[tokio::test]
async fn heartbeat_loss_requeues_leased_task_to_waiting() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();
    let outcome = h
        .records
        .add_records(
            &[molecule_id],
            &Specification::Singlepoint(singlepoint_spec()),
            "default",
            Priority::Normal,
            None,
        )
        .await
        .unwrap();
    let record_id = outcome.ids[0];

    register_manager(&h, "mgr-1", &["default"], BTreeMap::new()).await;

    h.queue
        .claim("mgr-1", &["default".to_string()], &BTreeMap::new(), 10)
        .await
        .unwrap();
    assert_eq!(
        h.records.get_records(&[record_id], false).await.unwrap()[0]
            .as_ref()
            .unwrap()
            .status,
        RecordStatus::Running
    );

    // Simulate an expired lease by requeuing as of a far-future instant;
    // the task adapter frees the lease, the runner's state-machine side
    // still needs its own heartbeat-loss transition.
    let expired = h
        .store
        .requeue_expired(chrono::Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(expired, vec![record_id]);

    h.store
        .transition(record_id, StatusEvent::HeartbeatLost)
        .await
        .unwrap();
    let rows = h.records.get_records(&[record_id], false).await.unwrap();
    assert_eq!(rows[0].as_ref().unwrap().status, RecordStatus::Waiting);
}

#[tokio::test]
async fn claim_prefers_higher_priority_within_matching_tag() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();

    let low = h
        .records
        .add_records(
            &[molecule_id],
            &Specification::Singlepoint(SinglepointSpec {
                method: "hf".into(),
                ..singlepoint_spec()
            }),
            "default",
            Priority::Low,
            None,
        )
        .await
        .unwrap()
        .ids[0];
    let high = h
        .records
        .add_records(
            &[molecule_id],
            &Specification::Singlepoint(SinglepointSpec {
                method: "mp2".into(),
                ..singlepoint_spec()
            }),
            "default",
            Priority::High,
            None,
        )
        .await
        .unwrap()
        .ids[0];

    register_manager(&h, "mgr-1", &["default"], BTreeMap::new()).await;

    let claimed = h
        .queue
        .claim("mgr-1", &["default".to_string()], &BTreeMap::new(), 1)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].record_id, high);
    assert_ne!(claimed[0].record_id, low);
}

#[tokio::test]
async fn torsiondrive_service_iterates_to_completion() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();

    let torsiondrive_spec = Specification::Torsiondrive(ServiceSpec {
        program: "psi4".into(),
        keywords: KeywordSet::new(BTreeMap::from([(
            "grid_spacing_degrees".to_string(),
            json!(180),
        )])),
        optimization_specification: optimization_spec(),
    });

    let outcome = h
        .records
        .add_records(&[molecule_id], &torsiondrive_spec, "default", Priority::Normal, None)
        .await
        .unwrap();
    let parent_id = outcome.ids[0];

    // With a 180-degree spacing the grid is {-180, 0, 180}; the variant
    // fans out one grid point at a time, so the run is: spawn, spawn,
    // finalize, never more than one in-flight child.
    h.runner.service_tick().await.unwrap();
    let children = h.store.children_of(parent_id).await.unwrap();
    assert_eq!(children.len(), 1);
    complete_as_singlepoint(&h, children[0], -1.0).await;

    h.runner.service_tick().await.unwrap();
    let children = h.store.children_of(parent_id).await.unwrap();
    assert_eq!(children.len(), 2);
    complete_as_singlepoint(&h, children[1], -0.9).await;

    h.runner.service_tick().await.unwrap();
    let row = h.records.get_records(&[parent_id], false).await.unwrap()[0]
        .clone()
        .unwrap();
    assert_eq!(row.status, RecordStatus::Complete);
    let scan = row.outputs.extra.get("torsion_scan_degrees").unwrap();
    assert_eq!(scan.as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn cancel_then_uncancel_round_trips_through_waiting() {
    let h = harness();
    let molecule_id = h.records.add_molecule(&water()).await.unwrap();
    let record_id = h
        .records
        .add_records(
            &[molecule_id],
            &Specification::Singlepoint(singlepoint_spec()),
            "default",
            Priority::Normal,
            None,
        )
        .await
        .unwrap()
        .ids[0];

    let row = h.records.cancel(record_id).await.unwrap();
    assert_eq!(row.status, RecordStatus::Cancelled);

    let row = h.records.uncancel(record_id).await.unwrap();
    assert_eq!(row.status, RecordStatus::Waiting);

    // A fresh claim succeeds again after the round trip.
    register_manager(&h, "mgr-1", &["default"], BTreeMap::new()).await;
    let claimed = h
        .queue
        .claim("mgr-1", &["default".to_string()], &BTreeMap::new(), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
}

/// Drives a task-based child (an optimization, in the torsiondrive case)
/// straight to `complete` the way a manager return would, bypassing claim —
/// the scenario only cares about the parent service's reaction to a
/// terminal child.
async fn complete_as_singlepoint(h: &Harness, record_id: i64, energy: f64) {
    h.store.transition(record_id, StatusEvent::Claim).await.unwrap();
    let outputs = RecordOutputs {
        return_result: Some(energy),
        ..Default::default()
    };
    h.store.set_outputs(record_id, outputs).await.unwrap();
    h.store
        .transition(record_id, StatusEvent::SuccessReturn)
        .await
        .unwrap();
}
