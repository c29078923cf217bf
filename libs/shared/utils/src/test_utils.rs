use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingRules, StoreBackend};
use shared_database::{MemoryStore, SchedulingStore};
use shared_models::auth::User;
use shared_models::scheduling::{
    Appointment, AppointmentStatus, AvailabilityWindow, ClinicAssignment, SpecializationCategory,
};

use crate::civil_time::{civil_instant, FixedClock};
use crate::state::AppState;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub scheduling: SchedulingRules,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            scheduling: SchedulingRules::default(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_service_role_key: None,
            store_backend: StoreBackend::Memory,
            bind_addr: "127.0.0.1:0".to_string(),
            scheduling: self.scheduling.clone(),
        }
    }

    /// State over an in-memory store with the clock pinned to `now`.
    pub fn to_state(&self, store: MemoryStore, now: FixedClock) -> Arc<AppState> {
        let store: Arc<dyn SchedulingStore> = Arc::new(store);
        Arc::new(AppState::with_clock(self.to_app_config(), store, Arc::new(now)))
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::new("test@example.com", "patient")
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn scholar(email: &str) -> Self {
        Self::new(email, "scholar")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_default()
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Row builders for seeding a [`MemoryStore`].
pub struct SchedulingFixtures;

impl SchedulingFixtures {
    pub fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("fixture date")
    }

    pub fn time(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M").expect("fixture time")
    }

    pub fn assignment(doctor_id: Uuid, clinic_id: Uuid, specialization: SpecializationCategory) -> ClinicAssignment {
        ClinicAssignment { doctor_id, clinic_id, specialization }
    }

    /// Active window on `date` from `start` to `end`, civil "HH:MM".
    pub fn window(doctor_id: Uuid, clinic_id: Uuid, date: &str, start: &str, end: &str) -> AvailabilityWindow {
        let day = Self::date(date);
        AvailabilityWindow {
            id: Uuid::new_v4(),
            doctor_id,
            clinic_id,
            date: day,
            start_time: civil_instant(day, Self::time(start)),
            end_time: civil_instant(day, Self::time(end)),
            archived_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn appointment(
        patient_id: Uuid,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: &str,
        start: &str,
        end: &str,
        status: AppointmentStatus,
    ) -> Appointment {
        let day = Self::date(date);
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            clinic_id,
            created_by: patient_id,
            date: day,
            start_time: civil_instant(day, Self::time(start)),
            end_time: civil_instant(day, Self::time(end)),
            service_type: "consultation".to_string(),
            status,
            remarks: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Clock pinned to a civil date and "HH:MM".
    pub fn clock_at(date: &str, time: &str) -> FixedClock {
        FixedClock::at_civil(Self::date(date), Self::time(time))
    }
}
