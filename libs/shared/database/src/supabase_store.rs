// libs/shared/database/src/supabase_store.rs
//
// PostgREST-backed scheduling store.
//
// Isolation comes from lock rows in `scheduling_locks`, acquired for every
// key of the unit's LockScope before any read. Writes are staged and flushed
// on commit; the duty-hour replace-range goes through a single RPC so
// Postgres runs delete+insert in one transaction.
//
// Database objects this store expects:
//
//   scheduling_locks (
//       lock_key    text primary key,        -- unique; a duplicate insert is the "held" signal
//       holder      uuid not null,
//       acquired_at timestamptz not null,
//       expires_at  timestamptz not null
//   )
//
//   create unique index appointments_active_slot
//       on appointments (doctor_id, date, start_time)
//       where status in ('pending', 'approved', 'moved');
//
//   replace_availability_windows(
//       p_doctor_id uuid, p_clinic_id uuid, p_from date, p_to date, p_windows jsonb
//   ) returns void
//       -- deletes the doctor/clinic windows dated p_from..=p_to, then inserts
//       -- every element of p_windows (availability_windows row shape), all in
//       -- the function's own transaction.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingRules;
use shared_models::scheduling::{
    Appointment, AppointmentStatus, AvailabilityWindow, ClinicAssignment,
};

use crate::store::{LockScope, SchedulingStore, SchedulingTx, StoreError};
use crate::supabase::{SupabaseClient, SupabaseError};

/// Table with a unique `lock_key`; see the header for its columns.
const LOCKS_PATH: &str = "/rest/v1/scheduling_locks";
const WINDOWS_PATH: &str = "/rest/v1/availability_windows";
const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
/// Transactional delete-range + insert; see the header for its signature.
const REPLACE_WINDOWS_RPC: &str = "/rest/v1/rpc/replace_availability_windows";

pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
    service_token: Option<String>,
    lock_ttl_seconds: i64,
    lock_retry_attempts: u32,
}

impl SupabaseStore {
    pub fn new(supabase: Arc<SupabaseClient>, service_token: Option<String>, rules: &SchedulingRules) -> Self {
        Self {
            supabase,
            service_token: service_token.filter(|token| !token.is_empty()),
            lock_ttl_seconds: rules.lock_ttl_seconds,
            lock_retry_attempts: rules.lock_retry_attempts.max(1),
        }
    }

    async fn try_acquire(&self, key: &str, holder: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now();
        let lock_data = json!({
            "lock_key": key,
            "holder": holder,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(self.lock_ttl_seconds)).to_rfc3339(),
        });

        let result: Result<Vec<Value>, SupabaseError> = self.supabase.request_with_headers(
            Method::POST,
            LOCKS_PATH,
            self.service_token.as_deref(),
            Some(lock_data),
            Some(SupabaseClient::return_representation()),
        ).await;

        match result {
            Ok(_) => Ok(true),
            Err(SupabaseError::Conflict(_)) => {
                // Clear a lock whose holder died without releasing it.
                let path = format!(
                    "{}?lock_key=eq.{}&expires_at=lt.{}",
                    LOCKS_PATH,
                    key,
                    now.format("%Y-%m-%dT%H:%M:%SZ")
                );
                let _: Vec<Value> = self.supabase.request(
                    Method::DELETE,
                    &path,
                    self.service_token.as_deref(),
                    None,
                ).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn release_locks(
    supabase: &SupabaseClient,
    token: Option<&str>,
    holder: Uuid,
    keys: &[String],
) -> Result<(), StoreError> {
    for key in keys {
        let path = format!("{}?lock_key=eq.{}&holder=eq.{}", LOCKS_PATH, key, holder);
        let _: Vec<Value> = supabase.request(Method::DELETE, &path, token, None).await?;
    }
    Ok(())
}

/// Lock release that never masks the caller's own outcome; rows left behind
/// expire after `lock_ttl_seconds`.
async fn release_or_expire(supabase: &SupabaseClient, token: Option<&str>, holder: Uuid, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    if let Err(e) = release_locks(supabase, token, holder, keys).await {
        warn!("Failed to release scheduling locks for {}, leaving them to expire: {}", holder, e);
    }
}

#[async_trait]
impl SchedulingStore for SupabaseStore {
    #[instrument(skip(self), fields(keys = scope.len()))]
    async fn begin(&self, scope: LockScope) -> Result<Box<dyn SchedulingTx>, StoreError> {
        let holder = Uuid::new_v4();
        let mut held: Vec<String> = Vec::with_capacity(scope.len());

        for key in scope.keys() {
            let mut acquired = false;
            for attempt in 1..=self.lock_retry_attempts {
                match self.try_acquire(key, holder).await {
                    Ok(true) => {
                        acquired = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        release_or_expire(&self.supabase, self.service_token.as_deref(), holder, &held).await;
                        return Err(e);
                    }
                }
                warn!("Scheduling lock {} busy, attempt {}/{}", key, attempt, self.lock_retry_attempts);
                tokio::time::sleep(StdDuration::from_millis(100 * attempt as u64)).await;
            }

            if !acquired {
                release_or_expire(&self.supabase, self.service_token.as_deref(), holder, &held).await;
                return Err(StoreError::Busy(key.to_string()));
            }
            held.push(key.to_string());
        }

        debug!("Acquired {} scheduling locks as {}", held.len(), holder);
        Ok(Box::new(SupabaseTx {
            supabase: Arc::clone(&self.supabase),
            token: self.service_token.clone(),
            holder,
            held,
            staged: Vec::new(),
            finished: false,
        }))
    }
}

enum StagedWrite {
    InsertAppointment(Appointment),
    UpdateAppointment(Appointment),
    InsertWindow(AvailabilityWindow),
    ReplaceWindows {
        doctor_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        windows: Vec<AvailabilityWindow>,
    },
    ArchiveBefore {
        cutoff: NaiveDate,
        archived_at: DateTime<Utc>,
    },
}

pub struct SupabaseTx {
    supabase: Arc<SupabaseClient>,
    token: Option<String>,
    holder: Uuid,
    held: Vec<String>,
    staged: Vec<StagedWrite>,
    finished: bool,
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
}

impl SupabaseTx {
    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            self.token.as_deref(),
            None,
        ).await?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| StoreError::Database(format!("Failed to parse rows: {}", e)))
    }

    async fn send(&self, method: Method, path: &str, body: Value) -> Result<(), StoreError> {
        let _: Vec<Value> = self.supabase.request_with_headers(
            method,
            path,
            self.token.as_deref(),
            Some(body),
            Some(SupabaseClient::return_representation()),
        ).await?;
        Ok(())
    }

    async fn flush(&self, write: &StagedWrite) -> Result<(), StoreError> {
        match write {
            StagedWrite::InsertAppointment(appointment) => {
                self.send(Method::POST, APPOINTMENTS_PATH, to_json(appointment)?).await
            }
            StagedWrite::UpdateAppointment(appointment) => {
                let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, appointment.id);
                let body = json!({
                    "date": appointment.date,
                    "start_time": appointment.start_time.to_rfc3339(),
                    "end_time": appointment.end_time.to_rfc3339(),
                    "status": appointment.status,
                    "remarks": appointment.remarks,
                    "updated_at": appointment.updated_at.to_rfc3339(),
                });
                self.send(Method::PATCH, &path, body).await
            }
            StagedWrite::InsertWindow(window) => {
                self.send(Method::POST, WINDOWS_PATH, to_json(window)?).await
            }
            StagedWrite::ReplaceWindows { doctor_id, clinic_id, from, to, windows } => {
                let body = json!({
                    "p_doctor_id": doctor_id,
                    "p_clinic_id": clinic_id,
                    "p_from": from,
                    "p_to": to,
                    "p_windows": windows,
                });
                let _: Value = self.supabase.request(
                    Method::POST,
                    REPLACE_WINDOWS_RPC,
                    self.token.as_deref(),
                    Some(body),
                ).await?;
                Ok(())
            }
            StagedWrite::ArchiveBefore { cutoff, archived_at } => {
                let path = format!("{}?date=lt.{}&archived_at=is.null", WINDOWS_PATH, cutoff);
                self.send(Method::PATCH, &path, json!({ "archived_at": archived_at.to_rfc3339() })).await
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Database(format!("Failed to encode row: {}", e)))
}

#[async_trait]
impl SchedulingTx for SupabaseTx {
    async fn active_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&clinic_id=eq.{}&date=eq.{}&archived_at=is.null&order=start_time.asc",
            WINDOWS_PATH, doctor_id, clinic_id, date
        );
        self.fetch(&path).await
    }

    async fn doctor_appointments(
        &mut self,
        doctor_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?doctor_id=eq.{}&date=eq.{}&status=in.({})&order=start_time.asc",
            APPOINTMENTS_PATH, doctor_id, date, status_list(statuses)
        );
        self.fetch(&path).await
    }

    async fn patient_appointments(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "{}?patient_id=eq.{}&date=eq.{}&status=in.({})&order=start_time.asc",
            APPOINTMENTS_PATH, patient_id, date, status_list(statuses)
        );
        self.fetch(&path).await
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS_PATH, appointment_id);
        let mut rows: Vec<Appointment> = self.fetch(&path).await?;
        Ok(rows.pop())
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::InsertAppointment(appointment.clone()));
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::UpdateAppointment(appointment.clone()));
        Ok(())
    }

    async fn has_consultation_record(&mut self, appointment_id: Uuid) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/consultation_records?appointment_id=eq.{}&select=id&limit=1", appointment_id);
        let rows: Vec<Value> = self.fetch(&path).await?;
        Ok(!rows.is_empty())
    }

    async fn clinic_assignment(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Option<ClinicAssignment>, StoreError> {
        let path = format!(
            "/rest/v1/clinic_assignments?doctor_id=eq.{}&clinic_id=eq.{}&limit=1",
            doctor_id, clinic_id
        );
        let mut rows: Vec<ClinicAssignment> = self.fetch(&path).await?;
        Ok(rows.pop())
    }

    async fn insert_window(&mut self, window: &AvailabilityWindow) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::InsertWindow(window.clone()));
        Ok(())
    }

    async fn replace_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        windows: &[AvailabilityWindow],
    ) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::ReplaceWindows {
            doctor_id,
            clinic_id,
            from,
            to,
            windows: windows.to_vec(),
        });
        Ok(())
    }

    async fn archive_windows_before(
        &mut self,
        cutoff: NaiveDate,
        archived_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let path = format!("{}?date=lt.{}&archived_at=is.null&select=id", WINDOWS_PATH, cutoff);
        let expiring: Vec<Value> = self.fetch(&path).await?;
        if !expiring.is_empty() {
            self.staged.push(StagedWrite::ArchiveBefore { cutoff, archived_at });
        }
        Ok(expiring.len())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let mut outcome = Ok(());
        for write in &self.staged {
            if let Err(e) = self.flush(write).await {
                outcome = Err(e);
                break;
            }
        }

        // Flushed rows are final whatever happens to the locks.
        self.finished = true;
        release_or_expire(&self.supabase, self.token.as_deref(), self.holder, &self.held).await;

        if outcome.is_ok() {
            info!("Committed {} staged writes", self.staged.len());
        }
        outcome
    }
}

impl Drop for SupabaseTx {
    fn drop(&mut self) {
        if self.finished || self.held.is_empty() {
            return;
        }
        // Rolled back: nothing was flushed, only the locks need to go.
        let supabase = Arc::clone(&self.supabase);
        let token = self.token.clone();
        let holder = self.holder;
        let keys = std::mem::take(&mut self.held);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = release_locks(&supabase, token.as_deref(), holder, &keys).await {
                        warn!("Failed to release scheduling locks for {}: {}", holder, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to release scheduling locks for {}; they will expire", holder),
        }
    }
}
