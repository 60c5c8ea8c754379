use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};

use shared_database::{
    BackendConnector, ConnectOptions, ConnectionRegistry, ConnectionState, Connector, DatabaseError,
    DatabaseLocator, DocumentStore, EntityKind,
};

/// Memory connector that counts opens and can fail or stall on demand.
#[derive(Default)]
struct ScriptedConnector {
    backend: BackendConnector,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedConnector {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        locator: &DatabaseLocator,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn DocumentStore>, DatabaseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DatabaseError::Connection {
                locator: locator.redacted(),
                reason: "connection refused".to_string(),
            });
        }
        self.backend.connect(locator, options).await
    }
}

fn registry_with(connector: Arc<ScriptedConnector>) -> ConnectionRegistry {
    let options = ConnectOptions {
        connect_timeout: Duration::from_millis(200),
        ..ConnectOptions::default()
    };
    ConnectionRegistry::with_connector(connector, options)
}

#[tokio::test]
async fn repeated_requests_reuse_one_connection() {
    let connector = Arc::new(ScriptedConnector::default());
    let registry = registry_with(connector.clone());
    let locator = DatabaseLocator::memory("clinic_a");

    let first = registry.get_connection(&locator).await.unwrap();
    let second = registry.get_connection(&locator).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.connects(), 1);
    assert_eq!(
        connector.backend.memory_database(&locator).registration_count(),
        EntityKind::TENANT_SCOPED.len()
    );
}

#[tokio::test]
async fn schema_handles_are_stable_per_database_and_entity() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let locator = DatabaseLocator::memory("clinic_a");
    let connection = registry.get_connection(&locator).await.unwrap();

    let a = registry.get_schema(&connection, "clinic_a", EntityKind::Doctor).unwrap();
    let b = registry.get_schema(&connection, "clinic_a", EntityKind::Doctor).unwrap();
    let other = registry.get_schema(&connection, "clinic_a", EntityKind::Patient).unwrap();

    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&other));
    assert_eq!(a.collection(), "doctors");
}

#[tokio::test]
async fn unknown_database_or_entity_is_rejected() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let connection = registry
        .get_connection(&DatabaseLocator::memory("clinic_a"))
        .await
        .unwrap();

    assert_matches!(
        registry.get_schema(&connection, "clinic_b", EntityKind::Doctor),
        Err(DatabaseError::UnknownSchema { .. })
    );
    assert_matches!(
        registry.get_schema(&connection, "clinic_a", EntityKind::Tenant),
        Err(DatabaseError::UnknownSchema { kind: EntityKind::Tenant, .. })
    );
}

#[tokio::test]
async fn different_tenants_get_isolated_databases() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let a = DatabaseLocator::memory("clinic_a");
    let b = DatabaseLocator::memory("clinic_b");

    let conn_a = registry.get_connection(&a).await.unwrap();
    let conn_b = registry.get_connection(&b).await.unwrap();
    assert!(!Arc::ptr_eq(&conn_a, &conn_b));

    let hospitals_a = registry.get_schema(&conn_a, "clinic_a", EntityKind::Hospital).unwrap();
    let hospitals_b = registry.get_schema(&conn_b, "clinic_b", EntityKind::Hospital).unwrap();
    hospitals_a
        .insert(&json!({"_id": "h1", "name": "North Campus"}))
        .await
        .unwrap();

    let found: Option<Value> = hospitals_b.find_by_id("h1").await.unwrap();
    assert!(found.is_none());
    let found: Option<Value> = hospitals_a.find_by_id("h1").await.unwrap();
    assert_eq!(found.unwrap()["name"], json!("North Campus"));
}

#[tokio::test]
async fn failed_open_is_not_cached() {
    let connector = Arc::new(ScriptedConnector::failing(1));
    let registry = registry_with(connector.clone());
    let locator = DatabaseLocator::memory("clinic_a");

    assert_matches!(
        registry.get_connection(&locator).await,
        Err(DatabaseError::Connection { .. })
    );
    assert_eq!(registry.open_connection_count().await, 0);

    let connection = registry.get_connection(&locator).await.unwrap();
    assert!(connection.is_ready());
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn slow_open_times_out() {
    let connector = Arc::new(ScriptedConnector::slow(Duration::from_millis(500)));
    let registry = registry_with(connector);

    assert_matches!(
        registry.get_connection(&DatabaseLocator::memory("clinic_a")).await,
        Err(DatabaseError::Timeout { timeout_ms: 200, .. })
    );
}

#[tokio::test]
async fn unsupported_locator_is_rejected_before_connecting() {
    let connector = Arc::new(ScriptedConnector::default());
    let registry = registry_with(connector.clone());

    assert_matches!(
        registry
            .get_connection(&DatabaseLocator::new("postgres://db", "clinic_a"))
            .await,
        Err(DatabaseError::UnsupportedLocator(_))
    );
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn broken_connection_is_reopened_and_handles_follow() {
    let connector = Arc::new(ScriptedConnector::default());
    let registry = registry_with(connector.clone());
    let locator = DatabaseLocator::memory("clinic_a");

    let first = registry.get_connection(&locator).await.unwrap();
    let handle = registry.get_schema(&first, "clinic_a", EntityKind::Specialty).unwrap();
    handle.insert(&json!({"_id": "s1", "name": "Cardiology"})).await.unwrap();

    first.mark_broken();
    assert_eq!(first.state(), ConnectionState::Broken);

    let second = registry.get_connection(&locator).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.generation() > first.generation());
    assert_eq!(first.state(), ConnectionState::Closed);
    assert_eq!(connector.connects(), 2);

    // Same handle, now bound to the new connection; data survived the reopen.
    let again = registry.get_schema(&second, "clinic_a", EntityKind::Specialty).unwrap();
    assert!(handle.ptr_eq(&again));
    let found: Option<Value> = handle.find_by_id("s1").await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn schemas_are_registered_once_per_open() {
    let connector = Arc::new(ScriptedConnector::default());
    let registry = registry_with(connector.clone());
    let locator = DatabaseLocator::memory("clinic_a");

    for _ in 0..5 {
        let connection = registry.get_connection(&locator).await.unwrap();
        registry.get_schema(&connection, "clinic_a", EntityKind::Log).unwrap();
    }

    // Re-registering the same shapes after a reopen changes nothing.
    registry.get_connection(&locator).await.unwrap().mark_broken();
    registry.get_connection(&locator).await.unwrap();

    assert_eq!(connector.connects(), 2);
    assert_eq!(
        connector.backend.memory_database(&locator).registration_count(),
        EntityKind::TENANT_SCOPED.len()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_opens_a_single_connection() {
    let connector = Arc::new(ScriptedConnector::slow(Duration::from_millis(20)));
    let registry = Arc::new(registry_with(connector.clone()));
    let locator = DatabaseLocator::memory("clinic_a");

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            let locator = locator.clone();
            tokio::spawn(async move { registry.get_connection(&locator).await })
        })
        .collect();

    let mut generations = Vec::new();
    for task in tasks {
        generations.push(task.await.unwrap().unwrap().generation());
    }

    generations.dedup();
    assert_eq!(generations.len(), 1);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn directory_and_tenant_catalogs_do_not_mix() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let directory = DatabaseLocator::memory("platform");

    let connection = registry.get_directory_connection(&directory).await.unwrap();
    assert!(registry.get_schema(&connection, "platform", EntityKind::Tenant).is_ok());
    assert_matches!(
        registry.get_schema(&connection, "platform", EntityKind::Doctor),
        Err(DatabaseError::UnknownSchema { .. })
    );

    assert_matches!(
        registry.get_connection(&directory).await,
        Err(DatabaseError::SchemaConflict { .. })
    );
}

#[tokio::test]
async fn close_forgets_one_locator() {
    let connector = Arc::new(ScriptedConnector::default());
    let registry = registry_with(connector.clone());
    let a = DatabaseLocator::memory("clinic_a");
    let b = DatabaseLocator::memory("clinic_b");

    let conn_a = registry.get_connection(&a).await.unwrap();
    let handle = registry.get_schema(&conn_a, "clinic_a", EntityKind::Doctor).unwrap();
    registry.get_connection(&b).await.unwrap();

    assert!(registry.close(&a).await);
    assert!(!registry.close(&a).await);
    assert_eq!(conn_a.state(), ConnectionState::Closed);
    assert_eq!(registry.open_connection_count().await, 1);

    let stale: Result<Option<Value>, _> = handle.find_by_id("d1").await;
    assert_matches!(stale, Err(DatabaseError::NotReady(_)));

    let reopened = registry.get_connection(&a).await.unwrap();
    let fresh = registry.get_schema(&reopened, "clinic_a", EntityKind::Doctor).unwrap();
    assert!(!fresh.ptr_eq(&handle));
}

#[tokio::test]
async fn close_all_shuts_every_connection() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let a = registry.get_connection(&DatabaseLocator::memory("clinic_a")).await.unwrap();
    let b = registry.get_connection(&DatabaseLocator::memory("clinic_b")).await.unwrap();

    registry.close_all().await;

    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(b.state(), ConnectionState::Closed);
    assert_eq!(registry.open_connection_count().await, 0);
}

#[tokio::test]
async fn close_during_a_slow_open_closes_what_was_opened() {
    let registry = Arc::new(registry_with(Arc::new(ScriptedConnector::slow(Duration::from_millis(50)))));
    let locator = DatabaseLocator::memory("clinic_a");

    let opening = tokio::spawn({
        let registry = registry.clone();
        let locator = locator.clone();
        async move { registry.get_connection(&locator).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(registry.close(&locator).await);
    let connection = opening.await.unwrap().unwrap();

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(registry.open_connection_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_close_and_open_never_orphans_a_connection() {
    let registry = Arc::new(registry_with(Arc::new(ScriptedConnector::slow(Duration::from_millis(2)))));
    let locator = DatabaseLocator::memory("clinic_a");
    let mut handed_out = Vec::new();

    for _ in 0..40 {
        let opening = tokio::spawn({
            let registry = registry.clone();
            let locator = locator.clone();
            async move { registry.get_connection(&locator).await }
        });
        let closing = tokio::spawn({
            let registry = registry.clone();
            let locator = locator.clone();
            async move {
                tokio::task::yield_now().await;
                registry.close(&locator).await
            }
        });

        closing.await.unwrap();
        match opening.await.unwrap() {
            Ok(connection) => handed_out.push(connection),
            Err(err) => assert_matches!(err, DatabaseError::NotReady(_)),
        }
    }

    registry.close_all().await;

    assert_eq!(registry.open_connection_count().await, 0);
    for connection in &handed_out {
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}

#[tokio::test]
async fn conditional_update_through_a_handle() {
    let registry = registry_with(Arc::new(ScriptedConnector::default()));
    let connection = registry
        .get_connection(&DatabaseLocator::memory("clinic_a"))
        .await
        .unwrap();
    let meetings = registry.get_schema(&connection, "clinic_a", EntityKind::Meeting).unwrap();

    meetings
        .insert(&json!({"_id": "m1", "external_meeting_id": "zoom-1", "status": "scheduled"}))
        .await
        .unwrap();

    let guard = [shared_database::Condition::eq("status", "scheduled")];
    let set = [shared_database::Mutation::set("status", "ended")];
    assert!(meetings.update("m1", &guard, &set).await.unwrap());
    assert!(!meetings.update("m1", &guard, &set).await.unwrap());

    assert_matches!(
        meetings.insert(&json!({"_id": "m2"})).await,
        Err(DatabaseError::MissingField { .. })
    );
}
