// models/src/doctor.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A doctor record, linked one-to-one with a profile whose role is `doctor`.
/// The `profile_id` linkage is invariant: one doctor row per doctor profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub department_id: Option<Uuid>,
    pub specialty: String,
    pub bio: String,
    pub experience_years: u32,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewDoctor {
    pub profile_id: Uuid,
    pub department_id: Option<Uuid>,
    pub specialty: String,
    pub bio: String,
    pub experience_years: u32,
    pub photo_url: Option<String>,
}

impl NewDoctor {
    pub fn into_doctor(self) -> Doctor {
        Doctor {
            id: Uuid::new_v4(),
            profile_id: self.profile_id,
            department_id: self.department_id,
            specialty: self.specialty,
            bio: self.bio,
            experience_years: self.experience_years,
            photo_url: self.photo_url,
        }
    }
}

/// Filters for the public doctor listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DoctorFilter {
    pub department_id: Option<Uuid>,
    pub specialty: Option<String>,
}

impl DoctorFilter {
    pub fn matches(&self, doctor: &Doctor) -> bool {
        if let Some(department_id) = self.department_id {
            if doctor.department_id != Some(department_id) {
                return false;
            }
        }
        if let Some(ref specialty) = self.specialty {
            if !doctor.specialty.eq_ignore_ascii_case(specialty) {
                return false;
            }
        }
        true
    }
}
