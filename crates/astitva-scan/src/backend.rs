//! Attendance backend client.
//!
//! The backend is a small REST API. Failed requests carry a JSON body with
//! a `detail` field, either a message string or a list of validation
//! errors; that text becomes the error message, with a per-operation
//! fallback when the body has none.

use astitva_core::{Descriptor, LabeledDescriptors};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::session::lock;

/// `verification_method` sent for face-verified attendance.
pub const FACIAL_RECOGNITION: &str = "facial_recognition";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{detail} (HTTP {status})")]
    Api { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    /// Registration refused before any request was sent.
    #[error("invalid face descriptors: {0}")]
    Descriptors(String),
}

/// Basic record created by `POST /add-student`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStudent {
    pub student_id: String,
    pub full_name: String,
}

/// Everything the registration form collects about a student.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentDetails {
    pub student_id: String,
    pub full_name: String,
    pub department: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub year: Option<String>,
}

/// Partial update sent with `PATCH /students/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_descriptors: Option<Vec<Descriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_card_hash: Option<String>,
}

impl StudentUpdate {
    /// Profile fields plus the biometric metadata for a fresh registration.
    pub fn for_registration(details: &StudentDetails, descriptors: Vec<Descriptor>, capture_count: usize) -> Self {
        Self {
            department: details.department.clone(),
            email: details.email.clone(),
            phone: details.phone.clone(),
            year: details.year.clone(),
            face_descriptors: (!descriptors.is_empty()).then_some(descriptors),
            capture_count: Some(capture_count),
            qr_encoding: Some(format!("qr-{}", details.student_id)),
            id_card_hash: Some(format!("card-{}", details.student_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRequest {
    pub student_id: String,
    pub lecture_id: i64,
    pub verification_method: String,
    pub verification_data: String,
}

impl AttendanceRequest {
    /// Attendance backed by a face match at `confidence` percent.
    pub fn facial(student_id: impl Into<String>, lecture_id: i64, confidence: u8) -> Self {
        Self {
            student_id: student_id.into(),
            lecture_id,
            verification_method: FACIAL_RECOGNITION.to_string(),
            verification_data: serde_json::json!({ "confidence": confidence }).to_string(),
        }
    }
}

/// A student as listed by `GET /students`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub full_name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub face_descriptors: Vec<Descriptor>,
}

impl StudentRecord {
    pub fn to_labeled(&self) -> LabeledDescriptors {
        LabeledDescriptors {
            label: self.student_id.clone(),
            name: self.full_name.clone(),
            descriptors: self.face_descriptors.clone(),
        }
    }
}

/// Matcher gallery built from every student with at least one descriptor.
pub fn gallery(records: &[StudentRecord]) -> Vec<LabeledDescriptors> {
    records
        .iter()
        .filter(|r| !r.face_descriptors.is_empty())
        .map(StudentRecord::to_labeled)
        .collect()
}

/// Outcome of a complete registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationReceipt {
    pub student_id: String,
    pub enrolled: usize,
    pub failed_enrollments: usize,
    pub message: String,
}

/// REST operations the scanner and registration flows need.
pub trait StudentBackend: Send + Sync {
    fn add_student(&self, student: &NewStudent) -> impl Future<Output = Result<Value, BackendError>> + Send;

    fn update_student(
        &self,
        student_id: &str,
        update: &StudentUpdate,
    ) -> impl Future<Output = Result<Value, BackendError>> + Send;

    /// Upload one JPEG still as multipart field `file`.
    fn enroll_face(&self, student_id: &str, jpeg: Vec<u8>) -> impl Future<Output = Result<Value, BackendError>> + Send;

    fn mark_attendance(&self, request: &AttendanceRequest) -> impl Future<Output = Result<Value, BackendError>> + Send;

    fn list_students(&self) -> impl Future<Output = Result<Vec<StudentRecord>, BackendError>> + Send;
}

/// Add the student, attach profile and biometrics, then enroll each still.
///
/// At least one descriptor is required and all must share one length, or a
/// scan could never match the student. Failures in the first two steps
/// abort the registration. Enrollment failures are logged and counted in
/// the receipt.
pub async fn register_student_complete<B: StudentBackend>(
    backend: &B,
    details: &StudentDetails,
    images: Vec<Vec<u8>>,
    descriptors: Vec<Descriptor>,
) -> Result<RegistrationReceipt, BackendError> {
    if descriptors.is_empty() {
        return Err(BackendError::Descriptors(
            "at least one face descriptor is required".to_string(),
        ));
    }
    if Descriptor::common_len(&descriptors).is_none() {
        return Err(BackendError::Descriptors(
            "descriptors must share one non-zero length".to_string(),
        ));
    }
    let student_id = details.student_id.clone();

    backend
        .add_student(&NewStudent {
            student_id: student_id.clone(),
            full_name: details.full_name.clone(),
        })
        .await?;
    tracing::info!(student_id = %student_id, "student added");

    let update = StudentUpdate::for_registration(details, descriptors, images.len());
    backend.update_student(&student_id, &update).await?;

    let total = images.len();
    let mut enrolled = 0;
    for (index, image) in images.into_iter().enumerate() {
        match backend.enroll_face(&student_id, image).await {
            Ok(_) => enrolled += 1,
            Err(e) => {
                tracing::warn!(student_id = %student_id, index, error = %e, "face enrollment failed");
            }
        }
    }
    tracing::info!(student_id = %student_id, enrolled, total, "registration submitted");

    Ok(RegistrationReceipt {
        message: "Student registered successfully".to_string(),
        student_id,
        enrolled,
        failed_enrollments: total - enrolled,
    })
}

/// Message from a FastAPI-style error body, or `fallback`.
pub fn error_detail(body: &str, fallback: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback.to_string();
    };
    match value.get("detail") {
        Some(Value::String(detail)) if !detail.is_empty() => detail.clone(),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                fallback.to_string()
            } else {
                messages.join("; ")
            }
        }
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

/// `reqwest` implementation of [`StudentBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        fallback: &str,
    ) -> Result<T, BackendError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = error_detail(&body, fallback);
            tracing::warn!(status = status.as_u16(), detail = %detail, "backend request failed");
            return Err(BackendError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl StudentBackend for HttpBackend {
    async fn add_student(&self, student: &NewStudent) -> Result<Value, BackendError> {
        let request = self.client.post(self.url("/add-student")).json(student);
        self.execute(request, "Failed to add student").await
    }

    async fn update_student(&self, student_id: &str, update: &StudentUpdate) -> Result<Value, BackendError> {
        let request = self
            .client
            .patch(self.url(&format!("/students/{student_id}")))
            .json(update);
        self.execute(request, "Failed to update student").await
    }

    async fn enroll_face(&self, student_id: &str, jpeg: Vec<u8>) -> Result<Value, BackendError> {
        let part = reqwest::multipart::Part::bytes(jpeg)
            .file_name("face.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .client
            .post(self.url(&format!("/enroll-face/{student_id}")))
            .multipart(form);
        self.execute(request, "Face enrollment failed").await
    }

    async fn mark_attendance(&self, request: &AttendanceRequest) -> Result<Value, BackendError> {
        let http = self.client.post(self.url("/mark-attendance")).json(request);
        self.execute(http, "Failed to mark attendance").await
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>, BackendError> {
        let request = self.client.get(self.url("/students"));
        self.execute(request, "Failed to get students").await
    }
}

#[derive(Debug, Default)]
struct MockState {
    students: BTreeMap<String, StudentRecord>,
    enrollments: BTreeMap<String, usize>,
    attendance: Vec<AttendanceRequest>,
    fail_enrollment: bool,
}

/// In-memory [`StudentBackend`] with the same error shapes as the real API.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(records: Vec<StudentRecord>) -> Self {
        let backend = Self::default();
        {
            let mut state = lock(&backend.state);
            for record in records {
                state.students.insert(record.student_id.clone(), record);
            }
        }
        backend
    }

    /// Make every `enroll_face` call fail with HTTP 500.
    pub fn fail_enrollments(&self, fail: bool) {
        lock(&self.state).fail_enrollment = fail;
    }

    pub fn student(&self, student_id: &str) -> Option<StudentRecord> {
        lock(&self.state).students.get(student_id).cloned()
    }

    pub fn enrollments(&self, student_id: &str) -> usize {
        lock(&self.state).enrollments.get(student_id).copied().unwrap_or(0)
    }

    pub fn attendance(&self) -> Vec<AttendanceRequest> {
        lock(&self.state).attendance.clone()
    }

    fn not_found() -> BackendError {
        BackendError::Api {
            status: 404,
            detail: "Student not found".to_string(),
        }
    }
}

impl StudentBackend for MockBackend {
    async fn add_student(&self, student: &NewStudent) -> Result<Value, BackendError> {
        let mut state = lock(&self.state);
        if state.students.contains_key(&student.student_id) {
            return Err(BackendError::Api {
                status: 400,
                detail: "Student ID already exists".to_string(),
            });
        }
        state.students.insert(
            student.student_id.clone(),
            StudentRecord {
                student_id: student.student_id.clone(),
                full_name: student.full_name.clone(),
                ..StudentRecord::default()
            },
        );
        Ok(serde_json::json!({ "message": "Student added", "student_id": student.student_id }))
    }

    async fn update_student(&self, student_id: &str, update: &StudentUpdate) -> Result<Value, BackendError> {
        let mut state = lock(&self.state);
        let record = state.students.get_mut(student_id).ok_or_else(Self::not_found)?;
        if let Some(department) = &update.department {
            record.department = Some(department.clone());
        }
        if let Some(descriptors) = &update.face_descriptors {
            record.face_descriptors = descriptors.clone();
        }
        Ok(serde_json::json!({ "message": "Student updated", "student_id": student_id }))
    }

    async fn enroll_face(&self, student_id: &str, jpeg: Vec<u8>) -> Result<Value, BackendError> {
        let mut state = lock(&self.state);
        if state.fail_enrollment {
            return Err(BackendError::Api {
                status: 500,
                detail: "Face enrollment failed".to_string(),
            });
        }
        if !state.students.contains_key(student_id) {
            return Err(Self::not_found());
        }
        if jpeg.is_empty() {
            return Err(BackendError::Api {
                status: 400,
                detail: "No face found in image".to_string(),
            });
        }
        *state.enrollments.entry(student_id.to_string()).or_default() += 1;
        Ok(serde_json::json!({ "message": "Face enrolled successfully" }))
    }

    async fn mark_attendance(&self, request: &AttendanceRequest) -> Result<Value, BackendError> {
        let mut state = lock(&self.state);
        if !state.students.contains_key(&request.student_id) {
            return Err(Self::not_found());
        }
        state.attendance.push(request.clone());
        Ok(serde_json::json!({ "message": "Attendance marked successfully" }))
    }

    async fn list_students(&self) -> Result<Vec<StudentRecord>, BackendError> {
        Ok(lock(&self.state).students.values().cloned().collect())
    }
}
