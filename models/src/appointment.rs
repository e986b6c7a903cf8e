// models/src/appointment.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Role;

/// Lifecycle states of an appointment.
///
/// `Pending` is the initial state. `Rejected`, `Cancelled` and `Completed`
/// are terminal: no further transition is ever accepted from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Rejected | AppointmentStatus::Cancelled | AppointmentStatus::Completed
        )
    }

    /// Occupies a slot in the double-booking sense.
    pub fn holds_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    /// All statuses reachable from the current one.
    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Pending => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Rejected,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => {
                &[AppointmentStatus::Cancelled, AppointmentStatus::Completed]
            }
            // Terminal states: no transitions.
            AppointmentStatus::Rejected
            | AppointmentStatus::Cancelled
            | AppointmentStatus::Completed => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who cancelled an appointment; stamped alongside the `Cancelled` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Patient,
    Doctor,
    Admin,
}

impl From<Role> for CancelledBy {
    fn from(role: Role) -> Self {
        match role {
            Role::Patient => CancelledBy::Patient,
            Role::Doctor => CancelledBy::Doctor,
            Role::Admin => CancelledBy::Admin,
        }
    }
}

/// The outcome a doctor picks when deciding a pending appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Confirmed,
    Rejected,
}

impl DecisionOutcome {
    pub fn as_status(&self) -> AppointmentStatus {
        match self {
            DecisionOutcome::Confirmed => AppointmentStatus::Confirmed,
            DecisionOutcome::Rejected => AppointmentStatus::Rejected,
        }
    }
}

/// The central mutable entity of the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// Denormalized from the doctor at creation time.
    pub department_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub patient_note: Option<String>,
    pub doctor_note: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: DateTime<Utc>,
}

/// What a patient submits to book a slot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookingRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub patient_note: Option<String>,
}

/// Listing filters. Callers only ever see rows their role entitles them to;
/// these narrow further within that scope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppointmentFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        if let Some(patient_id) = self.patient_id {
            if appointment.patient_id != patient_id {
                return false;
            }
        }
        if let Some(doctor_id) = self.doctor_id {
            if appointment.doctor_id != doctor_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if appointment.status != status {
                return false;
            }
        }
        if let Some(date) = self.date {
            if appointment.appointment_date != date {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::AppointmentStatus::*;

    #[test]
    fn should_allow_every_documented_transition() {
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
    }

    #[test]
    fn should_reject_transitions_out_of_terminal_states() {
        for terminal in [Rejected, Cancelled, Completed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Confirmed, Rejected, Cancelled, Completed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn should_reject_undocumented_transitions() {
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!Confirmed.can_transition_to(Pending));
    }

    #[test]
    fn only_pending_and_confirmed_hold_a_slot() {
        assert!(Pending.holds_slot());
        assert!(Confirmed.holds_slot());
        assert!(!Rejected.holds_slot());
        assert!(!Cancelled.holds_slot());
        assert!(!Completed.holds_slot());
    }
}
