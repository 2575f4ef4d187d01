use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerRole {
    Student,
    Instructor,
    Agency,
}

/// The signed-in account acting on the workflow or reading notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Viewer {
    pub id: Uuid,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn student(id: Uuid) -> Self {
        Self { id, role: ViewerRole::Student }
    }

    pub fn instructor(id: Uuid) -> Self {
        Self { id, role: ViewerRole::Instructor }
    }
}

impl std::str::FromStr for ViewerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(ViewerRole::Student),
            "instructor" => Ok(ViewerRole::Instructor),
            "agency" => Ok(ViewerRole::Agency),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    #[serde(default)]
    pub instructor_id: Option<Uuid>,
}

impl Student {
    pub fn is_supervised_by(&self, instructor_id: Uuid) -> bool {
        self.instructor_id == Some(instructor_id)
    }
}
