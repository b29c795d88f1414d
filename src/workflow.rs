//! # Submission Workflow
//! Lecturer opens a session (one-time code + class location); a student submits
//! code + device location; the verdict decides Present/Absent and the code is
//! spent.
//!
//! In-memory stand-in for the document store. The registry lock is never held
//! across the evaluation await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PlausibilityError;
use crate::geo::Coordinate;
use crate::history::{AttendanceLog, AttendanceRecord, NewAttendance};
use crate::service::{EnrichmentOutcome, PlausibilityService};
use crate::telemetry;
use crate::verdict::{AttendanceStatus, PlausibilityRequest};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("missing required fields: {0}")]
    MissingFields(String),
    #[error("course {0} not found")]
    UnknownCourse(String),
    #[error("lecturer has not set a location for course {0} yet")]
    LocationNotSet(String),
    #[error("invalid attendance code")]
    InvalidCode,
    #[error(transparent)]
    Plausibility(#[from] PlausibilityError),
}

/// Lecturer input for opening (or re-opening) a course session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub course_code: String,
    pub attendance_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSession {
    pub course_code: String,
    /// `None` once spent.
    #[serde(skip_serializing)]
    pub attendance_code: Option<String>,
    pub reference: Option<Coordinate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub attendance_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub record: AttendanceRecord,
    pub enrichment: EnrichmentOutcome,
}

impl Submission {
    pub fn message(&self) -> String {
        format!(
            "Attendance recorded as {}. On-site probability: {:.0}%.",
            self.record.status.as_str(),
            self.record.location_score * 100.0
        )
    }
}

#[derive(Clone)]
pub struct SubmissionWorkflow {
    service: PlausibilityService,
    sessions: Arc<Mutex<HashMap<String, CourseSession>>>,
    log: Arc<AttendanceLog>,
}

impl SubmissionWorkflow {
    pub fn new(service: PlausibilityService, log: Arc<AttendanceLog>) -> Self {
        Self {
            service,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            log,
        }
    }

    pub fn service(&self) -> &PlausibilityService {
        &self.service
    }

    pub fn log(&self) -> &AttendanceLog {
        &self.log
    }

    /// Upsert a course session. A location given here must be valid; omitting it
    /// keeps the previous one.
    pub fn set_session(&self, req: SessionRequest) -> Result<CourseSession, WorkflowError> {
        let course_code = req.course_code.trim().to_string();
        let code = req.attendance_code.trim().to_string();
        if course_code.is_empty() || code.is_empty() {
            return Err(WorkflowError::MissingFields(
                "courseCode, attendanceCode".to_string(),
            ));
        }
        let location = match (req.latitude, req.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)?),
            (None, None) => None,
            _ => {
                return Err(WorkflowError::MissingFields(
                    "latitude and longitude must be given together".to_string(),
                ))
            }
        };

        let mut g = self.lock_sessions();
        let entry = g.entry(course_code.clone()).or_insert_with(|| CourseSession {
            course_code: course_code.clone(),
            attendance_code: None,
            reference: None,
            updated_at: Utc::now(),
        });
        entry.attendance_code = Some(code);
        if location.is_some() {
            entry.reference = location;
        }
        entry.updated_at = Utc::now();
        info!(course = %course_code, has_location = entry.reference.is_some(), "session code set");
        Ok(entry.clone())
    }

    pub fn session(&self, course_code: &str) -> Option<CourseSession> {
        self.lock_sessions().get(course_code).cloned()
    }

    pub async fn submit(&self, req: SubmitRequest) -> Result<Submission, WorkflowError> {
        let (lat, lon) = match (req.latitude, req.longitude) {
            (Some(lat), Some(lon))
                if !req.student_id.trim().is_empty()
                    && !req.course_code.trim().is_empty()
                    && !req.attendance_code.trim().is_empty() =>
            {
                (lat, lon)
            }
            _ => {
                return Err(WorkflowError::MissingFields(
                    "studentId, courseCode, attendanceCode, latitude, longitude".to_string(),
                ))
            }
        };
        let course_code = req.course_code.trim().to_string();
        let code = req.attendance_code.trim().to_string();

        // Claim the code atomically; concurrent submissions cannot both pass.
        let (reference, claimed_code) = {
            let mut g = self.lock_sessions();
            let session = g
                .get_mut(&course_code)
                .ok_or_else(|| WorkflowError::UnknownCourse(course_code.clone()))?;
            if session.attendance_code.as_deref() != Some(code.as_str()) {
                return Err(WorkflowError::InvalidCode);
            }
            let reference = session
                .reference
                .ok_or_else(|| WorkflowError::LocationNotSet(course_code.clone()))?;
            (reference, session.attendance_code.take())
        };

        let request = PlausibilityRequest::new(
            req.student_id.trim(),
            lat,
            lon,
            reference.lat,
            reference.lon,
        );
        let evaluation = match self.service.evaluate(&request).await {
            Ok(e) => e,
            Err(e) => {
                self.restore_code(&course_code, claimed_code);
                return Err(e.into());
            }
        };

        let threshold = self.service.policy().presence_threshold;
        let verdict = evaluation.verdict;
        let status = AttendanceStatus::from_probability(verdict.probability, threshold);
        let record = self.log.push(NewAttendance {
            student_id: request.subject_id,
            course_code,
            status,
            location_score: verdict.probability,
            remarks: verdict.rationale,
            distance_meters: verdict.distance_meters,
            policy_overridden: verdict.policy_overridden,
        });
        telemetry::record_submission(status);

        Ok(Submission {
            record,
            enrichment: evaluation.enrichment,
        })
    }

    // Put a claimed code back unless the lecturer issued a new one meanwhile.
    fn restore_code(&self, course_code: &str, code: Option<String>) {
        let mut g = self.lock_sessions();
        if let Some(session) = g.get_mut(course_code) {
            if session.attendance_code.is_none() {
                session.attendance_code = code;
            }
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, CourseSession>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}
