// models/src/availability.rs
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};

/// A weekly recurring availability window for a doctor. Advisory display
/// data only: bookings are not validated against these windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Availability {
    pub fn new(doctor_id: Uuid, weekday: u8, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Availability {
            id: Uuid::new_v4(),
            doctor_id,
            weekday,
            start_time,
            end_time,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.weekday > 6 {
            return Err(CoreError::InvalidData(format!(
                "weekday {} is out of range 0..=6",
                self.weekday
            )));
        }
        if self.start_time >= self.end_time {
            return Err(CoreError::InvalidData(format!(
                "availability window start {} is not before end {}",
                self.start_time, self.end_time
            )));
        }
        Ok(())
    }
}
