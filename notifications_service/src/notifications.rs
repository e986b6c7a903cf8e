// notifications_service/src/notifications.rs
//
// Change notification fan-out. The scheduling engine publishes one event
// per committed mutation; views subscribe with a row filter and re-fetch
// the rows they care about on receipt. Delivery is best-effort: a lagged
// subscriber reconciles by re-reading, never by assuming the state change
// was lost.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use models::Appointment;

const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Appointment,
    Department,
    Doctor,
    Availability,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Created,
    Updated,
}

/// One committed mutation. Carries just enough for a subscriber to decide
/// whether the row concerns it and to re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub row_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn appointment(op: ChangeOp, appointment: &Appointment) -> Self {
        ChangeEvent {
            entity: EntityKind::Appointment,
            op,
            row_id: appointment.id,
            patient_id: Some(appointment.patient_id),
            doctor_id: Some(appointment.doctor_id),
            occurred_at: Utc::now(),
        }
    }

    pub fn row(entity: EntityKind, op: ChangeOp, row_id: Uuid) -> Self {
        ChangeEvent {
            entity,
            op,
            row_id,
            patient_id: None,
            doctor_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn availability(op: ChangeOp, doctor_id: Uuid) -> Self {
        ChangeEvent {
            entity: EntityKind::Availability,
            op,
            row_id: doctor_id,
            patient_id: None,
            doctor_id: Some(doctor_id),
            occurred_at: Utc::now(),
        }
    }
}

/// Row filter a subscriber attaches to its receiver, mirroring the
/// "appointments where patient_id = X / doctor_id = Y" subscriptions of the
/// live views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        SubscriptionFilter::default()
    }

    pub fn for_patient(patient_id: Uuid) -> Self {
        SubscriptionFilter {
            patient_id: Some(patient_id),
            doctor_id: None,
        }
    }

    pub fn for_doctor(doctor_id: Uuid) -> Self {
        SubscriptionFilter {
            patient_id: None,
            doctor_id: Some(doctor_id),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(patient_id) = self.patient_id {
            if event.patient_id != Some(patient_id) {
                return false;
            }
        }
        if let Some(doctor_id) = self.doctor_id {
            if event.doctor_id != Some(doctor_id) {
                return false;
            }
        }
        true
    }
}

/// In-process publish/subscribe feed over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        ChangeFeed { tx }
    }

    /// Publishes a committed mutation. A send with no live subscribers is
    /// not an error; the state change already durably happened.
    pub fn publish(&self, event: ChangeEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!("Published change event to {} subscribers", receivers),
            Err(_) => debug!("Published change event with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        ChangeFeed::new(DEFAULT_FEED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use models::AppointmentStatus;

    fn appointment(patient_id: Uuid, doctor_id: Uuid) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            department_id: None,
            appointment_date: "2030-03-01".parse().unwrap(),
            appointment_time: "14:00:00".parse().unwrap(),
            status: AppointmentStatus::Pending,
            patient_note: None,
            doctor_note: None,
            cancelled_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();

        let appt = appointment(Uuid::new_v4(), Uuid::new_v4());
        feed.publish(ChangeEvent::appointment(ChangeOp::Created, &appt));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity, EntityKind::Appointment);
        assert_eq!(event.op, ChangeOp::Created);
        assert_eq!(event.row_id, appt.id);
    }

    #[tokio::test]
    async fn filters_scope_events_to_their_rows() {
        let patient = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        let mine = ChangeEvent::appointment(ChangeOp::Updated, &appointment(patient, doctor));
        let other =
            ChangeEvent::appointment(ChangeOp::Updated, &appointment(Uuid::new_v4(), doctor));

        let patient_filter = SubscriptionFilter::for_patient(patient);
        assert!(patient_filter.matches(&mine));
        assert!(!patient_filter.matches(&other));

        let doctor_filter = SubscriptionFilter::for_doctor(doctor);
        assert!(doctor_filter.matches(&mine));
        assert!(doctor_filter.matches(&other));

        assert!(SubscriptionFilter::all().matches(&mine));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let feed = ChangeFeed::default();
        let appt = appointment(Uuid::new_v4(), Uuid::new_v4());
        feed.publish(ChangeEvent::appointment(ChangeOp::Created, &appt));
    }
}
