//! Patrol data models (wire shapes shared with the remote API and local rows)
//!
//! Hierarchy ids are natural keys assigned by the remote service. The wire
//! format nests children inline and carries no back-references; those are
//! filled in by [`Plant::link_parents`] after decoding and on every local read.

use chrono::{DateTime, Local};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Date format used for report timestamps sent to the server
pub const REPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Root of the equipment hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub plant_id: i64,
    #[serde(rename = "plant_name")]
    pub name: String,
    #[serde(rename = "area_data")]
    pub areas: Vec<Area>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: i64,
    #[serde(rename = "area_name")]
    pub name: String,
    #[serde(default)]
    pub plant_id: i64,
    #[serde(rename = "equipment_group")]
    pub groups: Vec<EquipmentGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentGroup {
    #[serde(rename = "equipment_group_id")]
    pub group_id: i64,
    #[serde(rename = "equipment_group_name")]
    pub name: String,
    #[serde(default)]
    pub area_id: i64,
    #[serde(rename = "equipment_type")]
    pub types: Vec<EquipmentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentType {
    #[serde(rename = "equipment_type_id")]
    pub type_id: i64,
    #[serde(rename = "equipment_type_name")]
    pub name: String,
    #[serde(default)]
    pub group_id: i64,
    #[serde(rename = "tagno")]
    pub tags: Vec<Tag>,
}

/// A tag number: one physical piece of equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "tagno_id")]
    pub tag_id: i64,
    #[serde(rename = "tagno_name")]
    pub name: String,
    #[serde(default)]
    pub type_id: i64,
    #[serde(rename = "parameter")]
    pub parameters: Vec<Parameter>,
}

/// A checklist item on a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "parameter_id")]
    pub param_id: i64,
    #[serde(rename = "parameter_name")]
    pub name: String,
    pub unit: String,
    pub form_type: FormType,
    /// Comma-separated choices for option-style parameters
    #[serde(rename = "boolean_option")]
    pub boolean_options: String,
    pub correct_option: String,
    #[serde(deserialize_with = "deserialize_gap")]
    pub gap: String,
    #[serde(deserialize_with = "deserialize_mandatory")]
    pub mandatory: bool,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    pub ordering: i64,
    #[serde(default)]
    pub tag_id: i64,
}

impl Plant {
    /// Fill in every back-reference below this plant from the nesting.
    pub fn link_parents(&mut self) {
        for area in &mut self.areas {
            area.plant_id = self.plant_id;
            for group in &mut area.groups {
                group.area_id = area.area_id;
                for ty in &mut group.types {
                    ty.group_id = group.group_id;
                    for tag in &mut ty.tags {
                        tag.type_id = ty.type_id;
                        for param in &mut tag.parameters {
                            param.tag_id = tag.tag_id;
                        }
                    }
                }
            }
        }
    }
}

/// How a parameter is filled in on the checklist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FormType {
    Min,
    Max,
    Range,
    Option,
    #[default]
    Other,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Min => "min",
            FormType::Max => "max",
            FormType::Range => "range",
            FormType::Option => "option",
            FormType::Other => "other",
        }
    }
}

impl From<&str> for FormType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" => FormType::Min,
            "max" => FormType::Max,
            "range" => FormType::Range,
            "option" | "boolean" => FormType::Option,
            _ => FormType::Other,
        }
    }
}

impl From<String> for FormType {
    fn from(s: String) -> Self {
        FormType::from(s.as_str())
    }
}

impl From<FormType> for String {
    fn from(form_type: FormType) -> Self {
        form_type.as_str().to_string()
    }
}

/// `mandatory` as it appears on the wire: either a JSON bool or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Mandatory {
    Bool(bool),
    Int(i64),
}

impl Mandatory {
    /// Integers are true when non-zero.
    pub fn is_required(self) -> bool {
        match self {
            Mandatory::Bool(value) => value,
            Mandatory::Int(value) => value != 0,
        }
    }
}

fn deserialize_mandatory<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Mandatory::deserialize(deserializer).map(Mandatory::is_required)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(serde_json::Number),
}

fn deserialize_gap<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::Text(s)) => s,
        Some(StringOrNumber::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Envelope of `GET /hirarki-data`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyResponse {
    pub data: Vec<Plant>,
}

/// Why a patrol could not be carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Rain,
    #[serde(rename = "Technical Issue")]
    TechnicalIssue,
    Urgent,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Rain => "Rain",
            ReportStatus::TechnicalIssue => "Technical Issue",
            ReportStatus::Urgent => "Urgent",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "rain" => Ok(ReportStatus::Rain),
            "technicalissue" => Ok(ReportStatus::TechnicalIssue),
            "urgent" => Ok(ReportStatus::Urgent),
            _ => Err(format!("unknown report status: {s}")),
        }
    }
}

/// Who is filing a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reporter {
    pub name: String,
    pub username: String,
    pub department: String,
    pub role: String,
}

impl From<&User> for Reporter {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            username: user.email.clone(),
            department: user.department.clone(),
            role: user.role.clone(),
        }
    }
}

/// What the caller supplies when a patrol cannot be carried out
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub reporter: Reporter,
    pub status: ReportStatus,
    pub reason: String,
    pub location: String,
    pub longitude: Decimal,
    pub latitude: Decimal,
    /// JPEG bytes of the evidence photo
    pub photo: Vec<u8>,
}

/// A "cannot patrol" report. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannotPatrolReport {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub department: String,
    pub role: String,
    pub submitted_at: String,
    pub status: ReportStatus,
    pub reason: String,
    pub location: String,
    pub longitude: Decimal,
    pub latitude: Decimal,
    pub reason_date: String,
    pub photo_name: String,
    #[serde(skip)]
    pub photo: Vec<u8>,
    pub created_at: String,
}

impl CannotPatrolReport {
    /// Build a new report stamped with `now`.
    pub fn new(input: ReportInput, now: DateTime<Local>) -> Self {
        let formatted = now.format(REPORT_DATE_FORMAT).to_string();
        let location = if input.location.trim().is_empty() {
            "Unknown Location".to_string()
        } else {
            input.location
        };

        Self {
            id: Uuid::new_v4(),
            name: input.reporter.name,
            username: input.reporter.username,
            department: input.reporter.department,
            role: input.reporter.role,
            submitted_at: formatted.clone(),
            status: input.status,
            reason: input.reason,
            location,
            longitude: input.longitude,
            latitude: input.latitude,
            reason_date: formatted,
            photo_name: format!("photo_{}.jpg", now.timestamp()),
            photo: input.photo,
            created_at: now.to_rfc3339(),
        }
    }

    pub fn photo_size(&self) -> usize {
        self.photo.len()
    }
}

/// A report as kept locally, with its upload state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    #[serde(flatten)]
    pub report: CannotPatrolReport,
    #[serde(default)]
    pub synced_at: Option<String>,
}

impl StoredReport {
    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}

/// Response of `POST /cant-patrol`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// The authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub department: String,
    pub role: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub sequential_checklist: bool,
    #[serde(default)]
    pub conditional_sync: bool,
    #[serde(default)]
    pub multiple_patrol: bool,
}

/// Request body of `POST /login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: LoginData,
}

/// Error body returned by the API on failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
