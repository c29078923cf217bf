use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::{AppConfig, SchedulingRules, StoreBackend};
use shared_database::{LockScope, SchedulingStore, StoreError, SupabaseClient, SupabaseStore};
use shared_models::scheduling::{Appointment, AppointmentStatus, AvailabilityWindow};

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_jwt_secret: "test-secret".to_string(),
        supabase_service_role_key: Some("service-key".to_string()),
        store_backend: StoreBackend::Supabase,
        bind_addr: "127.0.0.1:0".to_string(),
        scheduling: SchedulingRules {
            lock_retry_attempts: 2,
            ..SchedulingRules::default()
        },
    }
}

fn store_for(config: &AppConfig) -> SupabaseStore {
    SupabaseStore::new(
        Arc::new(SupabaseClient::new(config)),
        config.store_token(),
        &config.scheduling,
    )
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
}

fn pending_appointment(doctor_id: Uuid) -> Appointment {
    let start = Utc.with_ymd_and_hms(2025, 3, 3, 2, 0, 0).unwrap();
    Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        doctor_id,
        clinic_id: Uuid::new_v4(),
        created_by: Uuid::new_v4(),
        date: monday(),
        start_time: start,
        end_time: start + chrono::Duration::minutes(30),
        service_type: "consultation".to_string(),
        status: AppointmentStatus::Pending,
        remarks: None,
        created_at: start,
        updated_at: start,
    }
}

async fn mount_lock_endpoints(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "held" }])))
        .mount(server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

#[tokio::test]
async fn reads_go_through_postgrest_filters() {
    let server = MockServer::start().await;
    mount_lock_endpoints(&server).await;

    let doctor_id = Uuid::new_v4();
    let clinic_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_windows"))
        .and(query_param("archived_at", "is.null"))
        .and(query_param("date", "eq.2025-03-03"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "clinic_id": clinic_id,
            "date": "2025-03-03",
            "start_time": "2025-03-03T01:00:00Z",
            "end_time": "2025-03-03T03:00:00Z",
            "archived_at": null,
            "created_at": "2025-03-01T00:00:00Z"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);

    let mut tx = store.begin(LockScope::doctor_day(doctor_id, monday())).await.unwrap();
    let windows = tx.active_windows(doctor_id, clinic_id, monday()).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(windows.len(), 1);
    assert!(windows[0].is_active());
}

#[tokio::test]
async fn staged_insert_is_flushed_on_commit_only() {
    let server = MockServer::start().await;
    mount_lock_endpoints(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);
    let doctor_id = Uuid::new_v4();

    // Rolled back: nothing reaches the appointments table.
    {
        let mut tx = store.begin(LockScope::doctor_day(doctor_id, monday())).await.unwrap();
        tx.insert_appointment(&pending_appointment(doctor_id)).await.unwrap();
    }

    let mut tx = store.begin(LockScope::doctor_day(doctor_id, monday())).await.unwrap();
    tx.insert_appointment(&pending_appointment(doctor_id)).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn unique_violation_on_commit_is_a_conflict() {
    let server = MockServer::start().await;
    mount_lock_endpoints(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint"
        })))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);
    let doctor_id = Uuid::new_v4();

    let mut tx = store.begin(LockScope::doctor_day(doctor_id, monday())).await.unwrap();
    tx.insert_appointment(&pending_appointment(doctor_id)).await.unwrap();

    assert_matches!(tx.commit().await, Err(StoreError::Conflict(_)));
}

#[tokio::test]
async fn held_lock_exhausts_retries_as_busy() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "code": "23505" })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);

    let result = store.begin(LockScope::doctor_day(Uuid::new_v4(), monday())).await;
    assert_matches!(result.err(), Some(StoreError::Busy(_)));
}

#[tokio::test]
async fn transport_failure_is_unavailable() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let store = store_for(&config);
    let result = store.begin(LockScope::doctor_day(Uuid::new_v4(), monday())).await;
    assert_matches!(result.err(), Some(StoreError::Unavailable(_)));
}

#[tokio::test]
async fn failed_acquire_releases_locks_already_held() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let doctor_key = format!("doctor:{}:{}", doctor_id, monday());
    let patient_key = format!("patient:{}:{}", patient_id, monday());

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .and(body_partial_json(json!({ "lock_key": doctor_key })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": doctor_key }])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .and(body_partial_json(json!({ "lock_key": patient_key })))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .and(query_param("lock_key", format!("eq.{}", doctor_key)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);
    let scope = LockScope::doctor_day(doctor_id, monday()).with_patient_day(patient_id, monday());

    let result = store.begin(scope).await;
    assert_matches!(result.err(), Some(StoreError::Database(_)));
}

#[tokio::test]
async fn persisted_writes_commit_even_if_lock_release_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "lock_key": "held" }])))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let store = store_for(&config);
    let doctor_id = Uuid::new_v4();

    let mut tx = store.begin(LockScope::doctor_day(doctor_id, monday())).await.unwrap();
    tx.insert_appointment(&pending_appointment(doctor_id)).await.unwrap();

    assert!(tx.commit().await.is_ok());
}

#[tokio::test]
async fn duty_week_replacement_calls_rpc_with_its_named_parameters() {
    let server = MockServer::start().await;
    mount_lock_endpoints(&server).await;
    let doctor_id = Uuid::new_v4();
    let clinic_id = Uuid::new_v4();
    let friday = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/replace_availability_windows"))
        .and(body_partial_json(json!({
            "p_doctor_id": doctor_id,
            "p_clinic_id": clinic_id,
            "p_from": "2025-03-03",
            "p_to": "2025-03-07",
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap();
    let window = AvailabilityWindow {
        id: Uuid::new_v4(),
        doctor_id,
        clinic_id,
        date: monday(),
        start_time: start,
        end_time: start + chrono::Duration::hours(9),
        archived_at: None,
        created_at: start,
    };

    let config = config_for(&server);
    let store = store_for(&config);
    let mut tx = store
        .begin(LockScope::doctor_days(doctor_id, monday().iter_days().take(5)))
        .await
        .unwrap();
    tx.replace_windows(doctor_id, clinic_id, monday(), friday, &[window]).await.unwrap();
    tx.commit().await.unwrap();
}
