//! Durable student-side entities

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Student row, keyed by `identity_hash`
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: Uuid,
    pub user_id: Uuid,
    pub identity_hash: String,
    /// Storage form of the sealed NIM
    pub identity_ciphertext: String,
    pub name: String,
    pub batch_year: i32,
    pub current_semester: u32,
    /// IPK
    pub cumulative_index: f64,
    pub total_credits: u32,
}

impl Student {
    pub fn risk_status(&self) -> RiskStatus {
        RiskStatus::from_ipk(self.cumulative_index)
    }
}

/// One course attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AcademicRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub credits: u32,
    pub semester: u32,
    pub grade_letter: String,
    pub grade_point: f64,
    pub import_log_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Login identity linked 1:1 to a student
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub role: String,
    pub must_reset_password: bool,
}

/// Academic risk tier derived from IPK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskStatus {
    /// IPK below 2.00 (KRITIS)
    Critical,
    /// IPK below 2.75 (WASPADA)
    Warning,
    /// AMAN
    Safe,
}

impl RiskStatus {
    pub const CRITICAL_BELOW: f64 = 2.00;
    pub const WARNING_BELOW: f64 = 2.75;

    pub fn from_ipk(ipk: f64) -> Self {
        if ipk < Self::CRITICAL_BELOW {
            RiskStatus::Critical
        } else if ipk < Self::WARNING_BELOW {
            RiskStatus::Warning
        } else {
            RiskStatus::Safe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_thresholds() {
        assert_eq!(RiskStatus::from_ipk(0.0), RiskStatus::Critical);
        assert_eq!(RiskStatus::from_ipk(1.99), RiskStatus::Critical);
        assert_eq!(RiskStatus::from_ipk(2.00), RiskStatus::Warning);
        assert_eq!(RiskStatus::from_ipk(2.74), RiskStatus::Warning);
        assert_eq!(RiskStatus::from_ipk(2.75), RiskStatus::Safe);
        assert_eq!(RiskStatus::from_ipk(4.0), RiskStatus::Safe);
    }
}
