// scheduler/src/engine.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use models::errors::{CoreError, CoreResult};
use models::{
    Appointment, AppointmentFilter, AppointmentStatus, Availability, BookingRequest, CancelledBy,
    DecisionOutcome, Department, DepartmentUpdate, Doctor, DoctorFilter, NewDepartment, NewDoctor,
    Profile, ProfileUpdate, Role,
};
use notifications_service::{ChangeEvent, ChangeFeed, ChangeOp, EntityKind};
use security::Caller;
use security::policy::{self, Action, Resource};
use storage::SchedulingStore;

/// The scheduling engine: every operation authorizes the caller, validates
/// input, applies the state change as one atomic storage operation, and
/// publishes a change event once the mutation has committed.
///
/// The engine keeps no mutable state of its own; all cross-request
/// coordination is delegated to the store's transactions.
pub struct SchedulingEngine {
    store: Arc<SchedulingStore>,
    feed: ChangeFeed,
}

impl SchedulingEngine {
    pub fn new(store: Arc<SchedulingStore>, feed: ChangeFeed) -> Self {
        SchedulingEngine { store, feed }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn store(&self) -> &SchedulingStore {
        &self.store
    }

    fn must_get_appointment(&self, id: Uuid) -> CoreResult<Appointment> {
        self.store
            .get_appointment(id)?
            .ok_or(CoreError::NotFound("appointment"))
    }

    /// A slot must be well-formed and in the future.
    fn validate_slot(date: NaiveDate, time: NaiveTime) -> CoreResult<()> {
        let requested = date.and_time(time);
        if requested <= Utc::now().naive_utc() {
            return Err(CoreError::InvalidSlot(format!(
                "slot {} {} is in the past",
                date, time
            )));
        }
        Ok(())
    }

    // --- Appointments -------------------------------------------------------

    /// Books a slot for a patient. The uniqueness check and the insert are
    /// one storage transaction; a losing concurrent booking surfaces as
    /// `SlotTaken` and is the caller's cue to pick another slot.
    pub async fn create_appointment(
        &self,
        caller: &Caller,
        request: BookingRequest,
    ) -> CoreResult<Appointment> {
        Self::validate_slot(request.appointment_date, request.appointment_time)?;
        policy::authorize(
            caller,
            Action::Create,
            Resource::NewAppointment {
                patient_id: request.patient_id,
            },
        )
        .into_result()?;

        let doctor = self
            .store
            .get_doctor(request.doctor_id)?
            .ok_or(CoreError::NotFound("doctor"))?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            doctor_id: doctor.id,
            department_id: doctor.department_id,
            appointment_date: request.appointment_date,
            appointment_time: request.appointment_time,
            status: AppointmentStatus::Pending,
            patient_note: request.patient_note,
            doctor_note: None,
            cancelled_by: None,
            created_at: Utc::now(),
        };
        self.store.create_appointment(&appointment)?;
        info!(
            "Booked appointment {} for patient {} with doctor {} at {} {}",
            appointment.id,
            appointment.patient_id,
            appointment.doctor_id,
            appointment.appointment_date,
            appointment.appointment_time
        );
        self.feed
            .publish(ChangeEvent::appointment(ChangeOp::Created, &appointment));
        Ok(appointment)
    }

    /// The assigned doctor (or an admin) confirms or rejects a pending
    /// appointment.
    pub async fn decide(
        &self,
        caller: &Caller,
        appointment_id: Uuid,
        outcome: DecisionOutcome,
        note: Option<String>,
    ) -> CoreResult<Appointment> {
        let appointment = self.must_get_appointment(appointment_id)?;
        let new_status = outcome.as_status();
        policy::authorize_transition(caller, &appointment, new_status, None).into_result()?;

        let updated = self.store.apply_transition(appointment_id, |current| {
            if !current.status.can_transition_to(new_status) {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: new_status,
                });
            }
            let mut updated = current.clone();
            updated.status = new_status;
            if let Some(ref doctor_note) = note {
                updated.doctor_note = Some(doctor_note.clone());
            }
            Ok(updated)
        })?;
        info!("Appointment {} decided: {}", appointment_id, updated.status);
        self.feed
            .publish(ChangeEvent::appointment(ChangeOp::Updated, &updated));
        Ok(updated)
    }

    /// Cancels an appointment, stamping who cancelled it. Patients may only
    /// cancel their own pending appointments; doctors their own pending or
    /// confirmed ones; admins any non-terminal appointment.
    pub async fn cancel(&self, caller: &Caller, appointment_id: Uuid) -> CoreResult<Appointment> {
        let appointment = self.must_get_appointment(appointment_id)?;
        let attribution = CancelledBy::from(caller.role);
        policy::authorize_transition(
            caller,
            &appointment,
            AppointmentStatus::Cancelled,
            Some(attribution),
        )
        .into_result()?;

        let role = caller.role;
        let updated = self.store.apply_transition(appointment_id, move |current| {
            // Stricter than the transition graph: a patient loses the right
            // to cancel once the doctor has confirmed.
            if role == Role::Patient && current.status != AppointmentStatus::Pending {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: AppointmentStatus::Cancelled,
                });
            }
            if !current.status.can_transition_to(AppointmentStatus::Cancelled) {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: AppointmentStatus::Cancelled,
                });
            }
            let mut updated = current.clone();
            updated.status = AppointmentStatus::Cancelled;
            updated.cancelled_by = Some(attribution);
            Ok(updated)
        })?;
        info!(
            "Appointment {} cancelled by {}",
            appointment_id,
            caller.role
        );
        self.feed
            .publish(ChangeEvent::appointment(ChangeOp::Updated, &updated));
        Ok(updated)
    }

    /// Marks a confirmed appointment as completed. Admin-only; there is no
    /// automatic completion sweep.
    pub async fn complete(&self, caller: &Caller, appointment_id: Uuid) -> CoreResult<Appointment> {
        let appointment = self.must_get_appointment(appointment_id)?;
        policy::authorize_transition(caller, &appointment, AppointmentStatus::Completed, None)
            .into_result()?;

        let updated = self.store.apply_transition(appointment_id, |current| {
            if !current.status.can_transition_to(AppointmentStatus::Completed) {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: AppointmentStatus::Completed,
                });
            }
            let mut updated = current.clone();
            updated.status = AppointmentStatus::Completed;
            Ok(updated)
        })?;
        info!("Appointment {} completed", appointment_id);
        self.feed
            .publish(ChangeEvent::appointment(ChangeOp::Updated, &updated));
        Ok(updated)
    }

    pub async fn get_appointment(&self, caller: &Caller, id: Uuid) -> CoreResult<Appointment> {
        let appointment = self.must_get_appointment(id)?;
        policy::authorize(caller, Action::Read, Resource::Appointment(&appointment))
            .into_result()?;
        Ok(appointment)
    }

    /// Lists appointments the caller is entitled to see, narrowed by the
    /// filter, ordered by `(date, time)` ascending.
    pub async fn list_appointments(
        &self,
        caller: &Caller,
        mut filter: AppointmentFilter,
    ) -> CoreResult<Vec<Appointment>> {
        match caller.role {
            Role::Patient => filter.patient_id = Some(caller.profile_id),
            Role::Doctor => filter.doctor_id = caller.doctor_id,
            Role::Admin => {}
        }
        debug!("Listing appointments with filter {:?}", filter);
        self.store.list_appointments(&filter)
    }

    // --- Departments --------------------------------------------------------

    pub async fn list_departments(&self) -> CoreResult<Vec<Department>> {
        self.store.list_departments()
    }

    pub async fn create_department(
        &self,
        caller: &Caller,
        new: NewDepartment,
    ) -> CoreResult<Department> {
        policy::authorize(caller, Action::Create, Resource::Department).into_result()?;
        let department = self.store.create_department(new)?;
        self.feed.publish(ChangeEvent::row(
            EntityKind::Department,
            ChangeOp::Created,
            department.id,
        ));
        Ok(department)
    }

    pub async fn update_department(
        &self,
        caller: &Caller,
        id: Uuid,
        changes: DepartmentUpdate,
    ) -> CoreResult<Department> {
        policy::authorize(caller, Action::Update, Resource::Department).into_result()?;
        let department = self.store.update_department(id, &changes)?;
        self.feed.publish(ChangeEvent::row(
            EntityKind::Department,
            ChangeOp::Updated,
            department.id,
        ));
        Ok(department)
    }

    // --- Doctors ------------------------------------------------------------

    pub async fn list_doctors(&self, filter: DoctorFilter) -> CoreResult<Vec<Doctor>> {
        self.store.list_doctors(&filter)
    }

    pub async fn get_doctor(&self, id: Uuid) -> CoreResult<Doctor> {
        self.store.get_doctor(id)?.ok_or(CoreError::NotFound("doctor"))
    }

    /// Admin action: links a doctor record to a doctor-role profile.
    pub async fn create_doctor(&self, caller: &Caller, new: NewDoctor) -> CoreResult<Doctor> {
        policy::authorize(caller, Action::Create, Resource::Doctor).into_result()?;
        let profile = self
            .store
            .get_profile(new.profile_id)?
            .ok_or(CoreError::NotFound("profile"))?;
        if profile.role != Role::Doctor {
            return Err(CoreError::InvalidData(format!(
                "profile {} does not have the doctor role",
                profile.id
            )));
        }
        let doctor = self.store.create_doctor(new.into_doctor())?;
        self.feed.publish(ChangeEvent::row(
            EntityKind::Doctor,
            ChangeOp::Created,
            doctor.id,
        ));
        Ok(doctor)
    }

    // --- Availability -------------------------------------------------------

    pub async fn list_availability(&self, doctor_id: Uuid) -> CoreResult<Vec<Availability>> {
        self.store.list_availability(doctor_id)
    }

    /// Replaces a doctor's weekly schedule. Windows are advisory display
    /// data: bookings are not checked against them.
    pub async fn set_availability(
        &self,
        caller: &Caller,
        doctor_id: Uuid,
        mut windows: Vec<Availability>,
    ) -> CoreResult<Vec<Availability>> {
        policy::authorize(caller, Action::Update, Resource::Availability { doctor_id })
            .into_result()?;
        self.store
            .get_doctor(doctor_id)?
            .ok_or(CoreError::NotFound("doctor"))?;
        for window in &mut windows {
            window.doctor_id = doctor_id;
            window.validate()?;
        }
        self.store.replace_availability(doctor_id, &windows)?;
        self.feed
            .publish(ChangeEvent::availability(ChangeOp::Updated, doctor_id));
        Ok(windows)
    }

    // --- Profiles -----------------------------------------------------------

    pub async fn get_profile(&self, caller: &Caller, id: Uuid) -> CoreResult<Profile> {
        policy::authorize(caller, Action::Read, Resource::Profile { owner: id }).into_result()?;
        self.store.get_profile(id)?.ok_or(CoreError::NotFound("profile"))
    }

    pub async fn update_profile(
        &self,
        caller: &Caller,
        id: Uuid,
        changes: ProfileUpdate,
    ) -> CoreResult<Profile> {
        policy::authorize(caller, Action::Update, Resource::Profile { owner: id })
            .into_result()?;
        let profile = self.store.update_profile(id, &changes)?;
        self.feed.publish(ChangeEvent::row(
            EntityKind::Profile,
            ChangeOp::Updated,
            profile.id,
        ));
        Ok(profile)
    }

    // --- Identity subsystem hooks -------------------------------------------

    /// Called by the identity subsystem when a new identity is provisioned.
    /// This is the only writer of `role`.
    pub async fn provision_profile(&self, profile: Profile) -> CoreResult<Profile> {
        if let Err(err) = self.store.create_profile(&profile) {
            warn!("Profile provisioning for {} failed: {}", profile.id, err);
            return Err(err);
        }
        self.feed.publish(ChangeEvent::row(
            EntityKind::Profile,
            ChangeOp::Created,
            profile.id,
        ));
        Ok(profile)
    }

    /// Called by the identity subsystem when the identity's email address
    /// has been verified.
    pub async fn confirm_email(&self, profile_id: Uuid) -> CoreResult<Profile> {
        let profile = self.store.confirm_email(profile_id)?;
        self.feed.publish(ChangeEvent::row(
            EntityKind::Profile,
            ChangeOp::Updated,
            profile.id,
        ));
        Ok(profile)
    }
}
