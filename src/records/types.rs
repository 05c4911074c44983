//! Record types shared by the repository, the queue and the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Store key prefix for serialized records
pub const RECORD_KEY_PREFIX: &str = "item_";

/// Store key holding the pending queue
pub const SYNC_QUEUE_KEY: &str = "sync_queue";

/// Store key holding the bearer token
pub const TOKEN_KEY: &str = "token";

/// Store key holding the signed-in user's display name
pub const USERNAME_KEY: &str = "username";

/// Build the store key for a record.
pub fn record_key(object_code: &str) -> String {
	format!("{}{}", RECORD_KEY_PREFIX, object_code)
}

/// Errors raised while creating or mutating a record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
	#[error("Object code is required")]
	MissingObjectCode,

	#[error("Record {0} has already been exited")]
	AlreadyExited(String),

	#[error("Record {object_code} cannot end at {end_date} before it began at {begin_date}")]
	EndBeforeBegin {
		object_code: String,
		begin_date: DateTime<Utc>,
		end_date: DateTime<Utc>,
	},
}

/// A single enter/exit tracking entry for one physical object.
///
/// Records are append-mostly: everything captured on entry stays fixed, and the exit event may set
/// `end_date` once and replace the picture. Use [`Record::exit`] for that transition so the
/// `synced` flag is reset together with the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
	pub object_code: String,
	pub object_type: String,
	pub creator: String,
	#[serde(default)]
	pub project_code: String,
	#[serde(default)]
	pub comment: String,
	#[serde(default)]
	pub state: String,
	pub begin_date: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_date: Option<DateTime<Utc>>,
	#[serde(deserialize_with = "coordinate")]
	pub latitude: f64,
	#[serde(deserialize_with = "coordinate")]
	pub longitude: f64,
	#[serde(default)]
	pub timezone: String,
	/// Local path or URI of the photo taken for this object
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub picture: Option<String>,
	/// True only once the remote endpoint accepted the current state
	#[serde(default)]
	pub synced: bool,
	/// The current `picture` has already been uploaded and is not sent again
	#[serde(default)]
	pub picture_synced: bool,
	/// Keys written by other clients, kept so they survive a rewrite
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Record {
	/// Start building a record for an entry event.
	pub fn builder(object_code: impl Into<String>) -> RecordBuilder {
		RecordBuilder::new(object_code)
	}

	/// Whether the exit event has been recorded.
	pub fn is_exited(&self) -> bool {
		self.end_date.is_some()
	}

	/// Record the exit event.
	///
	/// Sets `end_date` (once, never before `begin_date`), replaces the picture when one is given
	/// and marks the record as needing sync again. A kept picture that was already uploaded is
	/// not uploaded a second time.
	pub fn exit(
		&mut self,
		end_date: DateTime<Utc>,
		picture: Option<String>,
	) -> Result<(), RecordError> {
		if self.end_date.is_some() {
			return Err(RecordError::AlreadyExited(self.object_code.clone()));
		}
		if end_date < self.begin_date {
			return Err(RecordError::EndBeforeBegin {
				object_code: self.object_code.clone(),
				begin_date: self.begin_date,
				end_date,
			});
		}

		self.end_date = Some(end_date);
		if picture.is_some() {
			self.picture = picture;
			self.picture_synced = false;
		}
		self.synced = false;
		Ok(())
	}

	/// Mark the current state, picture included, as accepted remotely.
	pub fn mark_synced(&mut self) {
		self.synced = true;
		self.picture_synced = self.picture.is_some();
	}

	/// Whether `other` carries the same submittable state, ignoring the sync flags.
	pub fn same_content(&self, other: &Record) -> bool {
		self.creation_fields_match(other)
			&& self.end_date == other.end_date
			&& self.picture == other.picture
			&& self.extra == other.extra
	}

	/// Whether `other` only differs from `self` in fields the exit event may touch.
	pub(crate) fn creation_fields_match(&self, other: &Record) -> bool {
		self.object_code == other.object_code
			&& self.object_type == other.object_type
			&& self.creator == other.creator
			&& self.project_code == other.project_code
			&& self.comment == other.comment
			&& self.state == other.state
			&& self.begin_date == other.begin_date
			&& self.latitude == other.latitude
			&& self.longitude == other.longitude
			&& self.timezone == other.timezone
	}
}

/// Older clients stored coordinates as strings, newer ones as numbers.
fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Coordinate {
		Number(f64),
		Text(String),
	}

	match Coordinate::deserialize(deserializer)? {
		Coordinate::Number(value) => Ok(value),
		Coordinate::Text(text) => text.trim().parse::<f64>().map_err(serde::de::Error::custom),
	}
}

/// Builder for the record created by an entry event
pub struct RecordBuilder {
	object_code: String,
	object_type: String,
	creator: String,
	project_code: String,
	comment: String,
	state: String,
	begin_date: Option<DateTime<Utc>>,
	latitude: f64,
	longitude: f64,
	timezone: String,
	picture: Option<String>,
}

impl RecordBuilder {
	pub fn new(object_code: impl Into<String>) -> Self {
		Self {
			object_code: object_code.into(),
			object_type: String::new(),
			creator: String::new(),
			project_code: String::new(),
			comment: String::new(),
			state: String::new(),
			begin_date: None,
			latitude: 0.0,
			longitude: 0.0,
			timezone: String::new(),
			picture: None,
		}
	}

	pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
		self.object_type = object_type.into();
		self
	}

	pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
		self.creator = creator.into();
		self
	}

	pub fn with_project_code(mut self, project_code: impl Into<String>) -> Self {
		self.project_code = project_code.into();
		self
	}

	pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
		self.comment = comment.into();
		self
	}

	pub fn with_state(mut self, state: impl Into<String>) -> Self {
		self.state = state.into();
		self
	}

	/// Sets the entry timestamp; defaults to now
	pub fn with_begin_date(mut self, begin_date: DateTime<Utc>) -> Self {
		self.begin_date = Some(begin_date);
		self
	}

	/// Sets where and in which timezone the entry was captured
	pub fn with_location(
		mut self,
		latitude: f64,
		longitude: f64,
		timezone: impl Into<String>,
	) -> Self {
		self.latitude = latitude;
		self.longitude = longitude;
		self.timezone = timezone.into();
		self
	}

	pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
		self.picture = Some(picture.into());
		self
	}

	/// Builds the record. A new record is never synced.
	pub fn build(self) -> Result<Record, RecordError> {
		let object_code = self.object_code.trim().to_string();
		if object_code.is_empty() {
			return Err(RecordError::MissingObjectCode);
		}

		Ok(Record {
			object_code,
			object_type: self.object_type,
			creator: self.creator,
			project_code: self.project_code,
			comment: self.comment,
			state: self.state,
			begin_date: self.begin_date.unwrap_or_else(Utc::now),
			end_date: None,
			latitude: self.latitude,
			longitude: self.longitude,
			timezone: self.timezone,
			picture: self.picture,
			synced: false,
			picture_synced: false,
			extra: Map::new(),
		})
	}
}
