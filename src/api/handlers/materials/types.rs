use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use url::Url;
use utoipa::{IntoParams, ToSchema};

use crate::api::handlers::error::ApiError;
use crate::badges::Badge;

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 5000;
const TAG_MAX: usize = 100;
const FILENAME_MAX: usize = 255;
const REASON_MAX: usize = 200;
const NOTE_MAX: usize = 2000;

/// A material row joined with its uploader name and net vote count.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Material {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub college: String,
    pub course: String,
    pub file_url: String,
    pub filename: String,
    pub uploader_id: String,
    pub uploader_name: String,
    pub upload_date: String,
    /// Upvotes minus downvotes.
    pub vote_count: i64,
}

impl<'r> FromRow<'r, PgRow> for Material {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            subject: row.try_get("subject")?,
            college: row.try_get("college")?,
            course: row.try_get("course")?,
            file_url: row.try_get("file_url")?,
            filename: row.try_get("filename")?,
            uploader_id: row.try_get("uploader_id")?,
            uploader_name: row.try_get("uploader_name")?,
            upload_date: row.try_get("upload_date")?,
            vote_count: row.try_get("vote_count")?,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MaterialQuery {
    pub subject: Option<String>,
    pub college: Option<String>,
    pub course: Option<String>,
    /// Case-insensitive title search.
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewMaterialRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub subject: String,
    pub college: String,
    pub course: String,
    pub file_url: String,
    pub filename: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateMaterialRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub college: Option<String>,
    pub course: Option<String>,
    pub file_url: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateMaterialResponse {
    pub material: Material,
    /// Uploader's point total after the award.
    pub points: i32,
    pub new_badges: Vec<Badge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VoteRequest {
    pub vote_type: VoteType,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoteResponse {
    pub material_id: i64,
    pub vote_type: VoteType,
    pub vote_count: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BookmarkResponse {
    pub material_id: i64,
    pub bookmarked: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportRequest {
    pub reason: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Parse the `report_status` enum as read back with `::text`.
    ///
    /// # Errors
    /// Returns [`sqlx::Error::Decode`] for unknown values.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(sqlx::Error::Decode(
                format!("unknown report status: {other}").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub id: i64,
    pub material_id: i64,
    pub material_title: String,
    pub reporter_id: String,
    pub reason: String,
    pub note: String,
    pub status: ReportStatus,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
}

impl<'r> FromRow<'r, PgRow> for Report {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            material_id: row.try_get("material_id")?,
            material_title: row.try_get("material_title")?,
            reporter_id: row.try_get("reporter_id")?,
            reason: row.try_get("reason")?,
            note: row.try_get("note")?,
            status: ReportStatus::from_db(&status)?,
            resolved_by: row.try_get("resolved_by")?,
            resolution_notes: row.try_get("resolution_notes")?,
            resolved_at: row.try_get("resolved_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Validated material columns ready for INSERT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MaterialFields {
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) subject: String,
    pub(crate) college: String,
    pub(crate) course: String,
    pub(crate) file_url: String,
    pub(crate) filename: String,
}

/// Validated partial update; `None` keeps the stored value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct MaterialChanges {
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) college: Option<String>,
    pub(crate) course: Option<String>,
    pub(crate) file_url: Option<String>,
    pub(crate) filename: Option<String>,
}

impl MaterialChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.subject.is_none()
            && self.college.is_none()
            && self.course.is_none()
            && self.file_url.is_none()
            && self.filename.is_none()
    }
}

/// Trimmed value with a char count in `1..=max`.
fn required(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > max {
        return Err(ApiError::bad_request(format!(
            "{field} must be 1 to {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn bounded(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.chars().count() > max {
        return Err(ApiError::bad_request(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn file_url(value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Ok(trimmed.to_string())
        }
        _ => Err(ApiError::bad_request(
            "file_url must be an absolute http or https URL",
        )),
    }
}

pub(crate) fn validate_new_material(
    request: &NewMaterialRequest,
) -> Result<MaterialFields, ApiError> {
    Ok(MaterialFields {
        title: required("title", &request.title, TITLE_MAX)?,
        description: bounded(
            "description",
            request.description.as_deref().unwrap_or_default(),
            DESCRIPTION_MAX,
        )?,
        subject: required("subject", &request.subject, TAG_MAX)?,
        college: required("college", &request.college, TAG_MAX)?,
        course: required("course", &request.course, TAG_MAX)?,
        file_url: file_url(&request.file_url)?,
        filename: required("filename", &request.filename, FILENAME_MAX)?,
    })
}

pub(crate) fn validate_material_update(
    request: &UpdateMaterialRequest,
) -> Result<MaterialChanges, ApiError> {
    let changes = MaterialChanges {
        title: request
            .title
            .as_deref()
            .map(|value| required("title", value, TITLE_MAX))
            .transpose()?,
        description: request
            .description
            .as_deref()
            .map(|value| bounded("description", value, DESCRIPTION_MAX))
            .transpose()?,
        subject: request
            .subject
            .as_deref()
            .map(|value| required("subject", value, TAG_MAX))
            .transpose()?,
        college: request
            .college
            .as_deref()
            .map(|value| required("college", value, TAG_MAX))
            .transpose()?,
        course: request
            .course
            .as_deref()
            .map(|value| required("course", value, TAG_MAX))
            .transpose()?,
        file_url: request.file_url.as_deref().map(file_url).transpose()?,
        filename: request
            .filename
            .as_deref()
            .map(|value| required("filename", value, FILENAME_MAX))
            .transpose()?,
    };
    if changes.is_empty() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    Ok(changes)
}

/// Returns the trimmed `(reason, note)` pair.
pub(crate) fn validate_report(request: &ReportRequest) -> Result<(String, String), ApiError> {
    let reason = required("reason", &request.reason, REASON_MAX)?;
    let note = bounded(
        "note",
        request.note.as_deref().unwrap_or_default(),
        NOTE_MAX,
    )?;
    Ok((reason, note))
}

/// Blank filter values mean "no filter".
pub(crate) fn filter_value(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
