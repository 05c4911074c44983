//! HTTP client for the pointing endpoint.
//!
//! Each submission is one `POST {base_url}/api/pointing` carrying the record's current state and a
//! bearer token. Any 2xx answer counts as acceptance; every other status and every transport
//! failure leaves the record pending for a later run.

use super::types::{ClientError, PayloadFormat, SubmitError};
use crate::records::Record;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Path of the submission endpoint, relative to the base URL
pub const POINTING_PATH: &str = "api/pointing";

const PICTURE_FIELD: &str = "picture";
const PICTURE_FILENAME: &str = "photo.jpg";
const PICTURE_MIME: &str = "image/jpeg";

/// Submits one record's current state to the remote endpoint.
#[async_trait::async_trait]
pub trait RecordSubmitter: Send + Sync {
	/// Returns `Ok(())` only when the endpoint confirmed acceptance.
	async fn submit(&self, record: &Record, token: &str) -> Result<(), SubmitError>;
}

/// reqwest-based client for `POST /api/pointing`
#[derive(Clone)]
pub struct PointingClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Fully resolved endpoint URL.
	endpoint: Url,
	/// Body encoding used for submissions.
	format: PayloadFormat,
}

impl PointingClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `base_url` - Server root, e.g. `https://api.example.com`.
	/// * `request_timeout` - Upper bound for a whole request, including the upload.
	/// * `format` - Body encoding for submissions.
	pub fn new(
		base_url: &str,
		request_timeout: Duration,
		format: PayloadFormat,
	) -> Result<Self, ClientError> {
		let endpoint = endpoint_url(base_url)?;
		let http_client = Client::builder().timeout(request_timeout).build()?;

		Ok(Self {
			http_client,
			endpoint,
			format,
		})
	}

	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn multipart_body(&self, record: &Record) -> Result<Form, SubmitError> {
		let payload = PointingPayload::from(record);
		let mut form = Form::new()
			.text("objectCode", payload.object_code.to_string())
			.text("objectType", payload.object_type.to_string())
			.text("creator", payload.creator.to_string())
			.text("projectCode", payload.project_code.to_string())
			.text("comment", payload.comment.to_string())
			.text("state", payload.state.to_string())
			.text("beginDate", payload.begin_date)
			.text("latitude", payload.latitude.to_string())
			.text("longitude", payload.longitude.to_string())
			.text("timezone", payload.timezone.to_string());

		if let Some(end_date) = payload.end_date {
			form = form.text("endDate", end_date);
		}

		if let Some(picture) = unsent_picture(record) {
			if let Some(bytes) = read_picture(picture).await? {
				let part = Part::bytes(bytes)
					.file_name(PICTURE_FILENAME)
					.mime_str(PICTURE_MIME)?;
				form = form.part(PICTURE_FIELD, part);
			}
		}

		Ok(form)
	}
}

#[async_trait::async_trait]
impl RecordSubmitter for PointingClient {
	async fn submit(&self, record: &Record, token: &str) -> Result<(), SubmitError> {
		let request = self
			.http_client
			.post(self.endpoint.clone())
			.bearer_auth(token);

		let request = match self.format {
			PayloadFormat::Json => request.json(&PointingPayload::from(record)),
			PayloadFormat::Multipart => request.multipart(self.multipart_body(record).await?),
		};

		let response = request.send().await?;
		let status = response.status();

		if !status.is_success() {
			return Err(SubmitError::Rejected {
				status: status.as_u16(),
			});
		}

		debug!(
			"Endpoint accepted item {} with status {}",
			record.object_code, status
		);
		Ok(())
	}
}

/// Wire representation of a record. The local `synced` flag is never sent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PointingPayload<'a> {
	object_code: &'a str,
	object_type: &'a str,
	creator: &'a str,
	project_code: &'a str,
	comment: &'a str,
	state: &'a str,
	begin_date: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	end_date: Option<String>,
	latitude: f64,
	longitude: f64,
	timezone: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	picture: Option<&'a str>,
}

impl<'a> From<&'a Record> for PointingPayload<'a> {
	fn from(record: &'a Record) -> Self {
		Self {
			object_code: &record.object_code,
			object_type: &record.object_type,
			creator: &record.creator,
			project_code: &record.project_code,
			comment: &record.comment,
			state: &record.state,
			begin_date: iso_timestamp(&record.begin_date),
			end_date: record.end_date.as_ref().map(iso_timestamp),
			latitude: record.latitude,
			longitude: record.longitude,
			timezone: &record.timezone,
			picture: unsent_picture(record),
		}
	}
}

/// The picture reference, unless the endpoint already has that picture
fn unsent_picture(record: &Record) -> Option<&str> {
	record.picture.as_deref().filter(|_| !record.picture_synced)
}

fn iso_timestamp(timestamp: &DateTime<Utc>) -> String {
	timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn endpoint_url(base_url: &str) -> Result<Url, ClientError> {
	let invalid = |reason: String| ClientError::InvalidBaseUrl {
		url: base_url.to_string(),
		reason,
	};

	let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
		.map_err(|e| invalid(e.to_string()))?;
	if !matches!(base.scheme(), "http" | "https") {
		return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
	}

	base.join(POINTING_PATH).map_err(|e| invalid(e.to_string()))
}

/// Load the picture bytes. A picture that no longer exists is left out of the upload.
async fn read_picture(reference: &str) -> Result<Option<Vec<u8>>, SubmitError> {
	let path = PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference));

	match tokio::fs::read(&path).await {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			warn!("Picture {:?} no longer exists, submitting without it", path);
			Ok(None)
		}
		Err(source) => Err(SubmitError::PictureError {
			path: reference.to_string(),
			source,
		}),
	}
}
