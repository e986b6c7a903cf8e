// models/src/lib.rs

pub mod appointment;
pub mod availability;
pub mod department;
pub mod doctor;
pub mod errors;
pub mod profile;
pub mod roles;

pub use appointment::{
    Appointment, AppointmentFilter, AppointmentStatus, BookingRequest, CancelledBy,
    DecisionOutcome,
};
pub use availability::Availability;
pub use department::{Department, DepartmentUpdate, NewDepartment};
pub use doctor::{Doctor, DoctorFilter, NewDoctor};
pub use errors::{CoreError, CoreResult};
pub use profile::{Profile, ProfileUpdate};
pub use roles::Role;
