//! Bounded in-memory log of recorded attendance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::verdict::AttendanceStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: u64,
    pub student_id: String,
    pub course_code: String,
    pub status: AttendanceStatus,
    pub verified_location: bool,
    /// Verdict probability in `[0, 1]`.
    pub location_score: f64,
    /// Verdict rationale.
    pub remarks: String,
    pub distance_meters: f64,
    pub policy_overridden: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Fields a caller supplies; id and timestamp are assigned on push.
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: String,
    pub course_code: String,
    pub status: AttendanceStatus,
    pub location_score: f64,
    pub remarks: String,
    pub distance_meters: f64,
    pub policy_overridden: bool,
}

#[derive(Debug)]
pub struct AttendanceLog {
    inner: Mutex<Vec<AttendanceRecord>>,
    next_id: AtomicU64,
    cap: usize,
}

impl AttendanceLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            next_id: AtomicU64::new(1),
            cap,
        }
    }

    pub fn push(&self, new: NewAttendance) -> AttendanceRecord {
        let record = AttendanceRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            verified_location: new.status == AttendanceStatus::Present,
            student_id: new.student_id,
            course_code: new.course_code,
            status: new.status,
            location_score: new.location_score,
            remarks: new.remarks,
            distance_meters: new.distance_meters,
            policy_overridden: new.policy_overridden,
            recorded_at: Utc::now(),
        };

        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push(record.clone());
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
        record
    }

    /// Oldest first, at most `n`.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<AttendanceRecord> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn for_student(&self, student_id: &str) -> Vec<AttendanceRecord> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect()
    }
}
