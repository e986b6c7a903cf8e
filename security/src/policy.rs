// security/src/policy.rs
//
// The authorization policy engine: one function deciding allow/deny for a
// caller, an operation, and a target resource class. Appointment *updates*
// are transition-aware and go through `authorize_transition`; every clause
// there is a conjunction, so one failing clause denies the whole update.

use uuid::Uuid;

use models::errors::{CoreError, CoreResult};
use models::{Appointment, AppointmentStatus, CancelledBy, Role};

use crate::Caller;

/// CRUD-style operations the policy speaks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

/// Target of an authorization check. Record classes that need ownership
/// context carry the relevant ids.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Department,
    Profile { owner: Uuid },
    Doctor,
    Availability { doctor_id: Uuid },
    Appointment(&'a Appointment),
    /// A creation attempt, before any row exists.
    NewAppointment { patient_id: Uuid },
}

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> CoreResult<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(CoreError::Forbidden(reason.to_string())),
        }
    }
}

fn allow_if(condition: bool, reason: &'static str) -> Decision {
    if condition {
        Decision::Allow
    } else {
        Decision::Deny(reason)
    }
}

/// Evaluates the policy table for a caller/action/resource triple.
///
/// Appointment updates are not decided here: they depend on the requested
/// transition, so callers use `authorize_transition` for those.
pub fn authorize(caller: &Caller, action: Action, resource: Resource) -> Decision {
    let is_admin = caller.role == Role::Admin;
    match resource {
        Resource::Department | Resource::Doctor => match action {
            Action::Read => Decision::Allow,
            _ => allow_if(is_admin, "admin only"),
        },
        Resource::Profile { owner } => {
            let is_self = caller.profile_id == owner;
            match action {
                Action::Read | Action::Update => {
                    allow_if(is_self || is_admin, "only the owner or an admin")
                }
                Action::Create => allow_if(is_self, "profiles are provisioned for their own identity"),
                Action::Delete => Decision::Deny("profiles are never deleted"),
            }
        }
        Resource::Availability { doctor_id } => match action {
            Action::Read => Decision::Allow,
            _ => allow_if(
                is_admin || caller.doctor_id == Some(doctor_id),
                "only the owning doctor or an admin",
            ),
        },
        Resource::Appointment(appointment) => match action {
            Action::Read => allow_if(
                is_admin
                    || caller.profile_id == appointment.patient_id
                    || caller.doctor_id == Some(appointment.doctor_id),
                "not a party to this appointment",
            ),
            Action::Create => Decision::Deny("appointments are created through booking"),
            Action::Update => Decision::Deny("appointment updates are decided per transition"),
            // Cancellation is a status update, never a delete.
            Action::Delete => Decision::Deny("appointments are never deleted"),
        },
        Resource::NewAppointment { patient_id } => match action {
            Action::Create => {
                if caller.role != Role::Patient {
                    Decision::Deny("only patients book appointments")
                } else if caller.profile_id != patient_id {
                    Decision::Deny("patients book only for themselves")
                } else if !caller.email_confirmed {
                    Decision::Deny("email address is not confirmed")
                } else {
                    Decision::Allow
                }
            }
            _ => Decision::Deny("no such operation on an unbooked appointment"),
        },
    }
}

/// Decides whether the caller may *request* the given status transition.
///
/// This covers ownership and per-role capability (which target statuses a
/// role may ask for, and that a cancellation is attributed to the caller's
/// own role). Whether the transition is legal from the appointment's
/// current state is the state machine's judgement and is reported as
/// `InvalidTransition` by the scheduling engine, after this check.
pub fn authorize_transition(
    caller: &Caller,
    appointment: &Appointment,
    new_status: AppointmentStatus,
    cancelled_by: Option<CancelledBy>,
) -> Decision {
    // Attribution must match the caller for cancellations and be absent
    // otherwise.
    let expected = if new_status == AppointmentStatus::Cancelled {
        Some(CancelledBy::from(caller.role))
    } else {
        None
    };
    if cancelled_by != expected {
        return Decision::Deny("cancellation attribution does not match the caller");
    }

    match caller.role {
        Role::Admin => Decision::Allow,
        Role::Doctor => {
            if caller.doctor_id != Some(appointment.doctor_id) {
                return Decision::Deny("not the assigned doctor");
            }
            match new_status {
                AppointmentStatus::Confirmed
                | AppointmentStatus::Rejected
                | AppointmentStatus::Cancelled => Decision::Allow,
                _ => Decision::Deny("doctors may only confirm, reject or cancel"),
            }
        }
        Role::Patient => {
            if caller.profile_id != appointment.patient_id {
                return Decision::Deny("not the booking patient");
            }
            allow_if(
                new_status == AppointmentStatus::Cancelled,
                "patients may only cancel",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn caller(role: Role, profile_id: Uuid, doctor_id: Option<Uuid>) -> Caller {
        Caller {
            profile_id,
            role,
            doctor_id,
            email_confirmed: true,
        }
    }

    fn appointment(patient_id: Uuid, doctor_id: Uuid, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            department_id: None,
            appointment_date: "2030-03-01".parse().unwrap(),
            appointment_time: "14:00:00".parse().unwrap(),
            status,
            patient_note: None,
            doctor_note: None,
            cancelled_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn departments_and_doctors_are_world_readable_admin_writable() {
        let admin = caller(Role::Admin, Uuid::new_v4(), None);
        let patient = caller(Role::Patient, Uuid::new_v4(), None);
        for resource in [Resource::Department, Resource::Doctor] {
            assert!(authorize(&patient, Action::Read, resource).is_allowed());
            assert!(!authorize(&patient, Action::Create, resource).is_allowed());
            assert!(!authorize(&patient, Action::Update, resource).is_allowed());
            assert!(!authorize(&patient, Action::Delete, resource).is_allowed());
            assert!(authorize(&admin, Action::Create, resource).is_allowed());
            assert!(authorize(&admin, Action::Update, resource).is_allowed());
        }
    }

    #[test]
    fn profiles_are_visible_to_self_and_admin_only() {
        let owner_id = Uuid::new_v4();
        let target = Resource::Profile { owner: owner_id };
        let owner = caller(Role::Patient, owner_id, None);
        let stranger = caller(Role::Patient, Uuid::new_v4(), None);
        let admin = caller(Role::Admin, Uuid::new_v4(), None);

        assert!(authorize(&owner, Action::Read, target).is_allowed());
        assert!(authorize(&owner, Action::Update, target).is_allowed());
        assert!(!authorize(&stranger, Action::Read, target).is_allowed());
        assert!(!authorize(&stranger, Action::Update, target).is_allowed());
        assert!(authorize(&admin, Action::Read, target).is_allowed());
        assert!(!authorize(&admin, Action::Delete, target).is_allowed());
    }

    #[test]
    fn availability_is_writable_by_owning_doctor_or_admin() {
        let doctor_id = Uuid::new_v4();
        let target = Resource::Availability { doctor_id };
        let owner = caller(Role::Doctor, Uuid::new_v4(), Some(doctor_id));
        let other = caller(Role::Doctor, Uuid::new_v4(), Some(Uuid::new_v4()));
        let admin = caller(Role::Admin, Uuid::new_v4(), None);
        let patient = caller(Role::Patient, Uuid::new_v4(), None);

        assert!(authorize(&patient, Action::Read, target).is_allowed());
        assert!(authorize(&owner, Action::Update, target).is_allowed());
        assert!(!authorize(&other, Action::Update, target).is_allowed());
        assert!(authorize(&admin, Action::Delete, target).is_allowed());
    }

    #[test]
    fn appointment_reads_require_being_a_party() {
        let patient_id = Uuid::new_v4();
        let doctor_id = Uuid::new_v4();
        let appt = appointment(patient_id, doctor_id, AppointmentStatus::Pending);
        let target = Resource::Appointment(&appt);

        let owner = caller(Role::Patient, patient_id, None);
        let other_patient = caller(Role::Patient, Uuid::new_v4(), None);
        let assigned = caller(Role::Doctor, Uuid::new_v4(), Some(doctor_id));
        let other_doctor = caller(Role::Doctor, Uuid::new_v4(), Some(Uuid::new_v4()));
        let admin = caller(Role::Admin, Uuid::new_v4(), None);

        assert!(authorize(&owner, Action::Read, target).is_allowed());
        assert!(!authorize(&other_patient, Action::Read, target).is_allowed());
        assert!(authorize(&assigned, Action::Read, target).is_allowed());
        assert!(!authorize(&other_doctor, Action::Read, target).is_allowed());
        assert!(authorize(&admin, Action::Read, target).is_allowed());
    }

    #[test]
    fn appointments_are_never_deletable() {
        let appt = appointment(Uuid::new_v4(), Uuid::new_v4(), AppointmentStatus::Pending);
        for role in [Role::Patient, Role::Doctor, Role::Admin] {
            let who = caller(role, appt.patient_id, Some(appt.doctor_id));
            assert!(!authorize(&who, Action::Delete, Resource::Appointment(&appt)).is_allowed());
        }
    }

    #[test]
    fn booking_requires_confirmed_email_and_self() {
        let patient_id = Uuid::new_v4();
        let target = Resource::NewAppointment { patient_id };

        let confirmed = caller(Role::Patient, patient_id, None);
        assert!(authorize(&confirmed, Action::Create, target).is_allowed());

        let mut unconfirmed = confirmed.clone();
        unconfirmed.email_confirmed = false;
        assert!(!authorize(&unconfirmed, Action::Create, target).is_allowed());

        let impostor = caller(Role::Patient, Uuid::new_v4(), None);
        assert!(!authorize(&impostor, Action::Create, target).is_allowed());

        let doctor = caller(Role::Doctor, patient_id, Some(Uuid::new_v4()));
        assert!(!authorize(&doctor, Action::Create, target).is_allowed());
    }

    #[test]
    fn patient_may_request_only_own_cancellation() {
        let patient_id = Uuid::new_v4();
        let appt = appointment(patient_id, Uuid::new_v4(), AppointmentStatus::Pending);
        let owner = caller(Role::Patient, patient_id, None);

        assert!(
            authorize_transition(
                &owner,
                &appt,
                AppointmentStatus::Cancelled,
                Some(CancelledBy::Patient)
            )
            .is_allowed()
        );
        // Wrong target status.
        assert!(
            !authorize_transition(&owner, &appt, AppointmentStatus::Confirmed, None).is_allowed()
        );
        // Wrong attribution.
        assert!(
            !authorize_transition(
                &owner,
                &appt,
                AppointmentStatus::Cancelled,
                Some(CancelledBy::Admin)
            )
            .is_allowed()
        );
        // Someone else's appointment.
        let stranger = caller(Role::Patient, Uuid::new_v4(), None);
        assert!(
            !authorize_transition(
                &stranger,
                &appt,
                AppointmentStatus::Cancelled,
                Some(CancelledBy::Patient)
            )
            .is_allowed()
        );
    }

    #[test]
    fn doctor_may_decide_and_cancel_only_own_appointments() {
        let doctor_id = Uuid::new_v4();
        let appt = appointment(Uuid::new_v4(), doctor_id, AppointmentStatus::Pending);
        let assigned = caller(Role::Doctor, Uuid::new_v4(), Some(doctor_id));
        let other = caller(Role::Doctor, Uuid::new_v4(), Some(Uuid::new_v4()));

        for status in [AppointmentStatus::Confirmed, AppointmentStatus::Rejected] {
            assert!(authorize_transition(&assigned, &appt, status, None).is_allowed());
            assert!(!authorize_transition(&other, &appt, status, None).is_allowed());
        }
        assert!(
            authorize_transition(
                &assigned,
                &appt,
                AppointmentStatus::Cancelled,
                Some(CancelledBy::Doctor)
            )
            .is_allowed()
        );
        // Completion is not a doctor capability.
        assert!(
            !authorize_transition(&assigned, &appt, AppointmentStatus::Completed, None)
                .is_allowed()
        );
    }

    #[test]
    fn admin_may_request_any_transition() {
        let appt = appointment(Uuid::new_v4(), Uuid::new_v4(), AppointmentStatus::Confirmed);
        let admin = caller(Role::Admin, Uuid::new_v4(), None);
        assert!(
            authorize_transition(&admin, &appt, AppointmentStatus::Completed, None).is_allowed()
        );
        assert!(
            authorize_transition(
                &admin,
                &appt,
                AppointmentStatus::Cancelled,
                Some(CancelledBy::Admin)
            )
            .is_allowed()
        );
    }
}
