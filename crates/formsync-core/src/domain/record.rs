//! The update-center tracking record ("form") and its attempt history.
//!
//! Field names follow the update-center wire format. Anything the workflow
//! does not model is kept in the flattened `extra` maps so that a
//! read-modify-write never drops fields owned by someone else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::artifact::ArtifactSet;
use crate::domain::change::ChangeSet;
use crate::domain::port::ForwardPortRecord;

pub const GITLAB_FORM_TYPE: &str = "GitLabForm";

fn default_form_type() -> String {
    GITLAB_FORM_TYPE.to_string()
}

/// Changed sources as recorded on the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(rename = "WinFiles", default)]
    pub files: ChangeSet,
    #[serde(rename = "UnixFiles", default)]
    pub unix_files: Vec<String>,
}

/// The merge-request linkage block of a form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormProperties {
    #[serde(rename = "GitMergeRequestID", default, with = "lenient_string")]
    pub merge_request_iid: String,
    #[serde(rename = "GitProjectID", default, with = "lenient_string")]
    pub project_id: String,
    #[serde(rename = "GitMiscInfo", default, with = "misc_info_json")]
    pub history: AttemptHistory,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One logical change's unit of record in the update center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    #[serde(
        rename = "FormID",
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_lenient_string"
    )]
    pub form_id: Option<String>,
    #[serde(rename = "BuildID", default, with = "lenient_string")]
    pub build_id: String,
    #[serde(rename = "FormType", default = "default_form_type")]
    pub form_type: String,
    #[serde(rename = "Author", default)]
    pub author: String,
    #[serde(rename = "Summary", default)]
    pub summary: String,
    #[serde(rename = "SourceInfo", default)]
    pub source_info: SourceInfo,
    #[serde(rename = "BinaryInfo", default)]
    pub artifacts: ArtifactSet,
    #[serde(rename = "GitLabFormProperties", default)]
    pub properties: FormProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackingRecord {
    /// A not-yet-submitted form for a merge request.
    pub fn draft(
        build_id: impl Into<String>,
        author: impl Into<String>,
        summary: impl Into<String>,
        files: ChangeSet,
        artifacts: ArtifactSet,
        merge_request_iid: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            form_id: None,
            build_id: build_id.into(),
            form_type: default_form_type(),
            author: author.into(),
            summary: summary.into(),
            source_info: SourceInfo {
                files,
                unix_files: Vec::new(),
            },
            artifacts,
            properties: FormProperties {
                merge_request_iid: merge_request_iid.into(),
                project_id: project_id.into(),
                history: AttemptHistory::default(),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    pub fn files(&self) -> &ChangeSet {
        &self.source_info.files
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.properties.history
    }

    pub fn history_mut(&mut self) -> &mut AttemptHistory {
        &mut self.properties.history
    }

    /// Form id, or an empty string for a record that was never created.
    pub fn id(&self) -> &str {
        self.form_id.as_deref().unwrap_or_default()
    }

    /// Link to the form in the update-center web UI.
    pub fn web_url(&self, base_url: &str) -> String {
        format!(
            "{}/Form.aspx?BuildID={}&FormID={}",
            base_url.trim_end_matches('/'),
            self.build_id,
            self.id()
        )
    }
}

/// Metadata of the last official attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeAttempt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_job_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata of the last friendly attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonAuthoritativeAttempt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_job_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_bool_string"
    )]
    pub refreshable: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view of the form's `GitMiscInfo` blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptHistory {
    #[serde(
        rename = "officialBuild",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authoritative: Option<AuthoritativeAttempt>,
    #[serde(
        rename = "friendlyBuild",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub non_authoritative: Option<NonAuthoritativeAttempt>,
    /// Merge request whose official build failed and which this change
    /// now corrects.
    #[serde(
        rename = "oldMr",
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_lenient_string"
    )]
    pub superseded_change: Option<String>,
    #[serde(
        rename = "AutoFpStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub forward_port: Option<ForwardPortRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttemptHistory {
    /// Back-reference left by a failed official build, if any.
    pub fn corrective_for(&self) -> Option<&str> {
        self.superseded_change
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn non_authoritative_mut(&mut self) -> &mut NonAuthoritativeAttempt {
        self.non_authoritative.get_or_insert_with(Default::default)
    }

    pub fn authoritative_mut(&mut self) -> &mut AuthoritativeAttempt {
        self.authoritative.get_or_insert_with(Default::default)
    }
}

/// `GitMiscInfo` travels as a JSON document encoded inside a string. Forms
/// created by auto forward-porting may carry `null` or an empty string.
mod misc_info_json {
    use super::AttemptHistory;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(history: &AttemptHistory, s: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(history).map_err(S::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<AttemptHistory, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(AttemptHistory::default()),
            Some(Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() || text == "null" {
                    Ok(AttemptHistory::default())
                } else {
                    serde_json::from_str(text).map_err(D::Error::custom)
                }
            }
            Some(obj @ Value::Object(_)) => serde_json::from_value(obj).map_err(D::Error::custom),
            Some(other) => Err(D::Error::custom(format!(
                "unexpected GitMiscInfo value: {other}"
            ))),
        }
    }
}

/// Ids arrive as numbers or strings depending on the endpoint.
mod lenient_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &str, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(D::Error::custom(format!("expected id, got {other}"))),
        }
    }
}

mod opt_lenient_string {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_str(v),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = super::lenient_string::deserialize(d)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }
}

/// The update center reads `refreshable` as the string `"true"`/`"false"`.
mod opt_bool_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(true) => s.serialize_str("true"),
            Some(false) => s.serialize_str("false"),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => match s.as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                other => Err(D::Error::custom(format!("expected boolean, got {other:?}"))),
            },
            Some(other) => Err(D::Error::custom(format!("expected boolean, got {other}"))),
        }
    }
}
