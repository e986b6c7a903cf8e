// models/src/department.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A department groups doctors. Admin-managed; everything else reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewDepartment {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DepartmentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl DepartmentUpdate {
    pub fn apply(&self, department: &mut Department) {
        if let Some(ref name) = self.name {
            department.name = name.clone();
        }
        if let Some(ref description) = self.description {
            department.description = description.clone();
        }
    }
}
