// storage/src/store.rs
use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use uuid::Uuid;

use models::errors::{CoreError, CoreResult};
use models::{
    Appointment, AppointmentFilter, Availability, Department, DepartmentUpdate, Doctor,
    DoctorFilter, NewDepartment, Profile, ProfileUpdate,
};

use crate::config::StoreConfig;

/// The sled-backed store for the scheduling core.
///
/// All cross-request coordination lives here: every check-then-act is a
/// single sled transaction, and the double-booking invariant is carried by
/// the `slots` tree, written in the same transaction as the appointment row.
/// A slot key exists exactly while a `pending`/`confirmed` appointment holds
/// that `(doctor, date, time)`.
pub struct SchedulingStore {
    db: sled::Db,
    profiles: sled::Tree,
    departments: sled::Tree,
    department_names: sled::Tree,
    doctors: sled::Tree,
    doctor_profiles: sled::Tree,
    availability: sled::Tree,
    appointments: sled::Tree,
    slots: sled::Tree,
}

fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn slot_key(doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> Vec<u8> {
    format!(
        "{}|{}|{}",
        doctor_id,
        date.format("%Y-%m-%d"),
        time.format("%H:%M:%S")
    )
    .into_bytes()
}

fn name_key(name: &str) -> Vec<u8> {
    name.trim().to_lowercase().into_bytes()
}

fn availability_key(doctor_id: Uuid, id: Uuid) -> Vec<u8> {
    format!("{}|{}", doctor_id, id).into_bytes()
}

fn unwrap_tx<T>(result: Result<T, TransactionError<CoreError>>) -> CoreResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(CoreError::Sled(err)),
    }
}

impl SchedulingStore {
    /// Opens (or creates) the store under the configured data directory.
    pub fn open(config: &StoreConfig) -> CoreResult<Self> {
        let path: &Path = &config.data_directory;
        if !path.exists() {
            info!("Creating database directory at {:?}", path);
            fs::create_dir_all(path).map_err(|e| {
                CoreError::Storage(format!(
                    "failed to create database directory at {:?}: {}",
                    path, e
                ))
            })?;
        }

        let mut builder = sled::Config::new()
            .path(path)
            .use_compression(config.use_compression);
        if let Some(capacity) = config.cache_capacity {
            builder = builder.cache_capacity(capacity);
        }
        let db = builder.open().map_err(|e| {
            CoreError::Storage(format!("failed to open sled database at {:?}: {}", path, e))
        })?;

        let store = SchedulingStore {
            profiles: db.open_tree("profiles")?,
            departments: db.open_tree("departments")?,
            department_names: db.open_tree("department_names")?,
            doctors: db.open_tree("doctors")?,
            doctor_profiles: db.open_tree("doctor_profiles")?,
            availability: db.open_tree("availability")?,
            appointments: db.open_tree("appointments")?,
            slots: db.open_tree("slots")?,
            db,
        };
        info!("Scheduling store ready at {:?}", path);
        Ok(store)
    }

    pub fn flush(&self) -> CoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Profiles -----------------------------------------------------------

    /// Inserts a freshly provisioned profile. The identity subsystem is the
    /// only caller; a second provisioning of the same identity is a conflict.
    pub fn create_profile(&self, profile: &Profile) -> CoreResult<()> {
        let value = encode(profile)?;
        let swap = self.profiles.compare_and_swap(
            profile.id.as_bytes(),
            None as Option<&[u8]>,
            Some(value),
        )?;
        if swap.is_err() {
            return Err(CoreError::Conflict(format!(
                "profile {} already provisioned",
                profile.id
            )));
        }
        debug!("Provisioned profile {} ({})", profile.id, profile.role);
        Ok(())
    }

    pub fn get_profile(&self, id: Uuid) -> CoreResult<Option<Profile>> {
        match self.profiles.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_profile(&self, id: Uuid, changes: &ProfileUpdate) -> CoreResult<Profile> {
        let updated = self.profiles.transaction(|profiles| {
            let bytes = profiles
                .get(id.as_bytes())?
                .ok_or(ConflictableTransactionError::Abort(CoreError::NotFound(
                    "profile",
                )))?;
            let mut profile: Profile =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            changes.apply(&mut profile);
            let value = encode(&profile).map_err(ConflictableTransactionError::Abort)?;
            profiles.insert(id.as_bytes().as_slice(), value)?;
            Ok(profile)
        });
        unwrap_tx(updated)
    }

    /// Identity-subsystem hook: flips `email_confirmed` when the identity's
    /// email is verified.
    pub fn confirm_email(&self, id: Uuid) -> CoreResult<Profile> {
        let updated = self.profiles.transaction(|profiles| {
            let bytes = profiles
                .get(id.as_bytes())?
                .ok_or(ConflictableTransactionError::Abort(CoreError::NotFound(
                    "profile",
                )))?;
            let mut profile: Profile =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            profile.email_confirmed = true;
            let value = encode(&profile).map_err(ConflictableTransactionError::Abort)?;
            profiles.insert(id.as_bytes().as_slice(), value)?;
            Ok(profile)
        });
        unwrap_tx(updated)
    }

    // --- Departments --------------------------------------------------------

    /// Creates a department, enforcing name uniqueness through the
    /// `department_names` index written in the same transaction.
    pub fn create_department(&self, new: NewDepartment) -> CoreResult<Department> {
        let department = Department {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            description: new.description,
        };
        let value = encode(&department)?;
        let key = name_key(&department.name);

        let result = (&self.departments, &self.department_names).transaction(
            |(departments, names)| {
                if names.get(key.as_slice())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(CoreError::Conflict(
                        format!("department '{}' already exists", department.name),
                    )));
                }
                names.insert(key.as_slice(), department.id.as_bytes().to_vec())?;
                departments.insert(department.id.as_bytes().as_slice(), value.clone())?;
                Ok(())
            },
        );
        unwrap_tx(result)?;
        info!("Created department '{}' ({})", department.name, department.id);
        Ok(department)
    }

    pub fn update_department(&self, id: Uuid, changes: &DepartmentUpdate) -> CoreResult<Department> {
        let result = (&self.departments, &self.department_names).transaction(
            |(departments, names)| {
                let bytes = departments.get(id.as_bytes())?.ok_or(
                    ConflictableTransactionError::Abort(CoreError::NotFound("department")),
                )?;
                let mut department: Department =
                    decode(&bytes).map_err(ConflictableTransactionError::Abort)?;

                if let Some(ref new_name) = changes.name {
                    let old_key = name_key(&department.name);
                    let new_key = name_key(new_name);
                    if new_key != old_key {
                        if names.get(new_key.as_slice())?.is_some() {
                            return Err(ConflictableTransactionError::Abort(CoreError::Conflict(
                                format!("department '{}' already exists", new_name),
                            )));
                        }
                        names.remove(old_key)?;
                        names.insert(new_key, id.as_bytes().to_vec())?;
                    }
                }
                changes.apply(&mut department);
                department.name = department.name.trim().to_string();
                let value = encode(&department).map_err(ConflictableTransactionError::Abort)?;
                departments.insert(id.as_bytes().as_slice(), value)?;
                Ok(department)
            },
        );
        unwrap_tx(result)
    }

    pub fn get_department(&self, id: Uuid) -> CoreResult<Option<Department>> {
        match self.departments.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_departments(&self) -> CoreResult<Vec<Department>> {
        let mut departments = Vec::new();
        for item in self.departments.iter() {
            let (_, bytes) = item?;
            departments.push(decode::<Department>(&bytes)?);
        }
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    // --- Doctors ------------------------------------------------------------

    /// Inserts a doctor row, enforcing the one-doctor-per-profile invariant
    /// through the `doctor_profiles` index.
    pub fn create_doctor(&self, doctor: Doctor) -> CoreResult<Doctor> {
        let value = encode(&doctor)?;
        let result = (&self.doctors, &self.doctor_profiles).transaction(|(doctors, links)| {
            if links.get(doctor.profile_id.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(CoreError::Conflict(
                    format!("profile {} already has a doctor record", doctor.profile_id),
                )));
            }
            links.insert(doctor.profile_id.as_bytes().as_slice(), doctor.id.as_bytes().to_vec())?;
            doctors.insert(doctor.id.as_bytes().as_slice(), value.clone())?;
            Ok(())
        });
        unwrap_tx(result)?;
        info!("Created doctor {} for profile {}", doctor.id, doctor.profile_id);
        Ok(doctor)
    }

    pub fn get_doctor(&self, id: Uuid) -> CoreResult<Option<Doctor>> {
        match self.doctors.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_doctor_by_profile(&self, profile_id: Uuid) -> CoreResult<Option<Doctor>> {
        let Some(link) = self.doctor_profiles.get(profile_id.as_bytes())? else {
            return Ok(None);
        };
        let doctor_id = Uuid::from_slice(&link)
            .map_err(|e| CoreError::Internal(format!("corrupt doctor link: {}", e)))?;
        self.get_doctor(doctor_id)
    }

    pub fn list_doctors(&self, filter: &DoctorFilter) -> CoreResult<Vec<Doctor>> {
        let mut doctors = Vec::new();
        for item in self.doctors.iter() {
            let (_, bytes) = item?;
            let doctor: Doctor = decode(&bytes)?;
            if filter.matches(&doctor) {
                doctors.push(doctor);
            }
        }
        doctors.sort_by(|a, b| a.specialty.cmp(&b.specialty).then(a.id.cmp(&b.id)));
        Ok(doctors)
    }

    // --- Availability -------------------------------------------------------

    /// Replaces a doctor's weekly schedule in one atomic batch.
    pub fn replace_availability(
        &self,
        doctor_id: Uuid,
        windows: &[Availability],
    ) -> CoreResult<()> {
        let mut batch = sled::Batch::default();
        let prefix = format!("{}|", doctor_id).into_bytes();
        for item in self.availability.scan_prefix(&prefix) {
            let (key, _) = item?;
            batch.remove(key);
        }
        for window in windows {
            batch.insert(availability_key(doctor_id, window.id), encode(window)?);
        }
        self.availability.apply_batch(batch)?;
        debug!("Replaced availability for doctor {} ({} windows)", doctor_id, windows.len());
        Ok(())
    }

    pub fn list_availability(&self, doctor_id: Uuid) -> CoreResult<Vec<Availability>> {
        let mut windows = Vec::new();
        let prefix = format!("{}|", doctor_id).into_bytes();
        for item in self.availability.scan_prefix(&prefix) {
            let (_, bytes) = item?;
            windows.push(decode::<Availability>(&bytes)?);
        }
        windows.sort_by_key(|w| (w.weekday, w.start_time));
        Ok(windows)
    }

    // --- Appointments -------------------------------------------------------

    /// Atomically claims the slot and inserts the appointment row.
    ///
    /// The claim and the insert are one sled transaction: of two concurrent
    /// creations targeting the same `(doctor, date, time)`, exactly one
    /// commits and the other observes the claimed slot and fails with
    /// `SlotTaken`. There is no read-then-write window.
    pub fn create_appointment(&self, appointment: &Appointment) -> CoreResult<()> {
        let value = encode(appointment)?;
        let key = slot_key(
            appointment.doctor_id,
            appointment.appointment_date,
            appointment.appointment_time,
        );
        let result = (&self.appointments, &self.slots).transaction(|(appointments, slots)| {
            if slots.get(key.as_slice())?.is_some() {
                return Err(ConflictableTransactionError::Abort(CoreError::SlotTaken));
            }
            slots.insert(key.as_slice(), appointment.id.as_bytes().to_vec())?;
            appointments.insert(appointment.id.as_bytes().as_slice(), value.clone())?;
            Ok(())
        });
        unwrap_tx(result)?;
        debug!(
            "Created appointment {} for doctor {} at {} {}",
            appointment.id,
            appointment.doctor_id,
            appointment.appointment_date,
            appointment.appointment_time
        );
        Ok(())
    }

    pub fn get_appointment(&self, id: Uuid) -> CoreResult<Option<Appointment>> {
        match self.appointments.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Applies a state transition produced by `mutate` as one atomic unit.
    ///
    /// `mutate` receives the current row as read inside the transaction, so
    /// its checks hold against concurrent writers; it either returns the
    /// fully updated row or the error that aborts the whole operation. When
    /// the row stops holding its slot (terminal transition), the slot index
    /// entry is released in the same transaction.
    pub fn apply_transition<F>(&self, id: Uuid, mutate: F) -> CoreResult<Appointment>
    where
        F: Fn(&Appointment) -> CoreResult<Appointment>,
    {
        let result = (&self.appointments, &self.slots).transaction(|(appointments, slots)| {
            let bytes = appointments.get(id.as_bytes())?.ok_or(
                ConflictableTransactionError::Abort(CoreError::NotFound("appointment")),
            )?;
            let current: Appointment =
                decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            let updated = mutate(&current).map_err(ConflictableTransactionError::Abort)?;

            if current.status.holds_slot() && !updated.status.holds_slot() {
                let key = slot_key(
                    current.doctor_id,
                    current.appointment_date,
                    current.appointment_time,
                );
                slots.remove(key)?;
            }
            let value = encode(&updated).map_err(ConflictableTransactionError::Abort)?;
            appointments.insert(id.as_bytes().as_slice(), value)?;
            Ok(updated)
        });
        unwrap_tx(result)
    }

    /// Ordered by `(appointment_date, appointment_time)` ascending.
    pub fn list_appointments(&self, filter: &AppointmentFilter) -> CoreResult<Vec<Appointment>> {
        let mut appointments = Vec::new();
        for item in self.appointments.iter() {
            let (_, bytes) = item?;
            let appointment: Appointment = decode(&bytes)?;
            if filter.matches(&appointment) {
                appointments.push(appointment);
            }
        }
        appointments.sort_by_key(|a| (a.appointment_date, a.appointment_time));
        Ok(appointments)
    }

    /// The appointment currently holding a slot, if any.
    pub fn slot_holder(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Option<Uuid>> {
        let Some(bytes) = self.slots.get(slot_key(doctor_id, date, time))? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("corrupt slot index: {}", e)))?;
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use models::{AppointmentStatus, CancelledBy, Role};
    use std::sync::Arc;

    fn open_store() -> (SchedulingStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SchedulingStore::open(&StoreConfig::at(dir.path())).unwrap();
        (store, dir)
    }

    fn appointment(doctor_id: Uuid, date: &str, time: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id,
            department_id: None,
            appointment_date: date.parse().unwrap(),
            appointment_time: time.parse().unwrap(),
            status: AppointmentStatus::Pending,
            patient_note: None,
            doctor_note: None,
            cancelled_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn should_reject_second_booking_of_same_slot() {
        let (store, _dir) = open_store();
        let doctor = Uuid::new_v4();
        let first = appointment(doctor, "2030-03-01", "14:00:00");
        let second = appointment(doctor, "2030-03-01", "14:00:00");

        store.create_appointment(&first).unwrap();
        let err = store.create_appointment(&second).unwrap_err();
        assert!(matches!(err, CoreError::SlotTaken));
        assert_eq!(
            store
                .slot_holder(doctor, first.appointment_date, first.appointment_time)
                .unwrap(),
            Some(first.id)
        );
    }

    #[test]
    fn should_allow_same_slot_for_different_doctors() {
        let (store, _dir) = open_store();
        let first = appointment(Uuid::new_v4(), "2030-03-01", "14:00:00");
        let second = appointment(Uuid::new_v4(), "2030-03-01", "14:00:00");
        store.create_appointment(&first).unwrap();
        store.create_appointment(&second).unwrap();
    }

    #[test]
    fn exactly_one_concurrent_writer_wins_a_slot() {
        let (store, _dir) = open_store();
        let store = Arc::new(store);
        let doctor = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.create_appointment(&appointment(doctor, "2030-03-01", "09:30:00"))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::SlotTaken)))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(losses, 7);
    }

    #[test]
    fn terminal_transition_releases_the_slot() {
        let (store, _dir) = open_store();
        let doctor = Uuid::new_v4();
        let first = appointment(doctor, "2030-03-01", "14:00:00");
        store.create_appointment(&first).unwrap();

        store
            .apply_transition(first.id, |a| {
                let mut updated = a.clone();
                updated.status = AppointmentStatus::Cancelled;
                updated.cancelled_by = Some(CancelledBy::Admin);
                Ok(updated)
            })
            .unwrap();

        assert_eq!(
            store
                .slot_holder(doctor, first.appointment_date, first.appointment_time)
                .unwrap(),
            None
        );
        // Slot is bookable again.
        store
            .create_appointment(&appointment(doctor, "2030-03-01", "14:00:00"))
            .unwrap();
    }

    #[test]
    fn confirming_keeps_the_slot_held() {
        let (store, _dir) = open_store();
        let doctor = Uuid::new_v4();
        let first = appointment(doctor, "2030-03-01", "14:00:00");
        store.create_appointment(&first).unwrap();

        store
            .apply_transition(first.id, |a| {
                let mut updated = a.clone();
                updated.status = AppointmentStatus::Confirmed;
                Ok(updated)
            })
            .unwrap();

        let err = store
            .create_appointment(&appointment(doctor, "2030-03-01", "14:00:00"))
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotTaken));
    }

    #[test]
    fn aborted_transition_leaves_no_partial_state() {
        let (store, _dir) = open_store();
        let doctor = Uuid::new_v4();
        let first = appointment(doctor, "2030-03-01", "14:00:00");
        store.create_appointment(&first).unwrap();

        let err = store
            .apply_transition(first.id, |a| {
                Err(CoreError::InvalidTransition {
                    from: a.status,
                    to: AppointmentStatus::Completed,
                })
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let row = store.get_appointment(first.id).unwrap().unwrap();
        assert_eq!(row.status, AppointmentStatus::Pending);
        assert_eq!(
            store
                .slot_holder(doctor, first.appointment_date, first.appointment_time)
                .unwrap(),
            Some(first.id)
        );
    }

    #[test]
    fn should_enforce_unique_department_names() {
        let (store, _dir) = open_store();
        store
            .create_department(NewDepartment {
                name: "Cardiology".into(),
                description: "Heart".into(),
            })
            .unwrap();
        let err = store
            .create_department(NewDepartment {
                name: "  cardiology ".into(),
                description: "Dup".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn should_enforce_one_doctor_per_profile() {
        let (store, _dir) = open_store();
        let profile_id = Uuid::new_v4();
        let doctor = models::NewDoctor {
            profile_id,
            department_id: None,
            specialty: "GP".into(),
            bio: String::new(),
            experience_years: 3,
            photo_url: None,
        };
        let created = store.create_doctor(doctor.clone().into_doctor()).unwrap();
        let err = store.create_doctor(doctor.into_doctor()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(
            store.get_doctor_by_profile(profile_id).unwrap().unwrap().id,
            created.id
        );
    }

    #[test]
    fn should_order_appointments_by_date_then_time() {
        let (store, _dir) = open_store();
        let doctor = Uuid::new_v4();
        store
            .create_appointment(&appointment(doctor, "2030-03-02", "09:00:00"))
            .unwrap();
        store
            .create_appointment(&appointment(doctor, "2030-03-01", "15:00:00"))
            .unwrap();
        store
            .create_appointment(&appointment(doctor, "2030-03-01", "09:00:00"))
            .unwrap();

        let listed = store
            .list_appointments(&AppointmentFilter::default())
            .unwrap();
        let keys: Vec<_> = listed
            .iter()
            .map(|a| (a.appointment_date, a.appointment_time))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn profile_provisioning_is_create_once() {
        let (store, _dir) = open_store();
        let profile = Profile::provisioned(Uuid::new_v4(), "Ana Ruiz", Role::Patient);
        store.create_profile(&profile).unwrap();
        let err = store.create_profile(&profile).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let confirmed = store.confirm_email(profile.id).unwrap();
        assert!(confirmed.email_confirmed);
    }
}
