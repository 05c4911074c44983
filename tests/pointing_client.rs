use pointing_sync::records::Record;
use pointing_sync::remote::{
	ConnectivityProbe, HttpConnectivityProbe, PayloadFormat, PointingClient, RecordSubmitter,
	SubmitError,
};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as seen by the test server
struct Captured {
	/// Request line and headers, lowercased
	head: String,
	body: Vec<u8>,
}

impl Captured {
	fn body_text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Serve a single request with `status` and hand back what was received.
async fn serve_once(status: u16) -> (String, JoinHandle<Captured>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let base_url = format!("http://{}", listener.local_addr().unwrap());

	let handle = tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.unwrap();
		let mut received = Vec::new();
		let mut chunk = [0u8; 4096];

		let head_end = loop {
			let n = socket.read(&mut chunk).await.unwrap();
			assert!(n > 0, "connection closed before headers");
			received.extend_from_slice(&chunk[..n]);
			if let Some(pos) = find(&received, b"\r\n\r\n") {
				break pos + 4;
			}
		};

		let head = String::from_utf8_lossy(&received[..head_end]).to_lowercase();
		let content_length = head
			.lines()
			.find_map(|line| line.strip_prefix("content-length:"))
			.map(|value| value.trim().parse::<usize>().unwrap());
		let chunked = head.contains("transfer-encoding: chunked");

		loop {
			let body = &received[head_end..];
			let complete = match content_length {
				Some(length) => body.len() >= length,
				None if chunked => find(body, b"0\r\n\r\n").is_some(),
				None => true,
			};
			if complete {
				break;
			}
			let n = socket.read(&mut chunk).await.unwrap();
			if n == 0 {
				break;
			}
			received.extend_from_slice(&chunk[..n]);
		}

		let response = format!(
			"HTTP/1.1 {} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
			status
		);
		socket.write_all(response.as_bytes()).await.unwrap();
		socket.shutdown().await.ok();

		Captured {
			head,
			body: received[head_end..].to_vec(),
		}
	});

	(base_url, handle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
	haystack
		.windows(needle.len())
		.position(|window| window == needle)
}

fn exited_record(picture: Option<String>) -> Record {
	let begin = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
	let mut record = Record::builder("CRATE-1")
		.with_object_type("crate")
		.with_creator("field-user")
		.with_project_code("PRJ-7")
		.with_comment("left dock B")
		.with_begin_date(begin)
		.with_location(36.75, 3.06, "Africa/Algiers")
		.build()
		.unwrap();
	record
		.exit(begin + ChronoDuration::minutes(90), picture)
		.unwrap();
	record
}

fn client(base_url: &str, format: PayloadFormat) -> PointingClient {
	PointingClient::new(base_url, Duration::from_secs(5), format).unwrap()
}

#[tokio::test]
async fn multipart_submission_carries_fields_and_picture() {
	let dir = tempfile::tempdir().unwrap();
	let picture = dir.path().join("capture.jpg");
	tokio::fs::write(&picture, b"JPEG-BYTES-FOR-TEST")
		.await
		.unwrap();

	let (base_url, server) = serve_once(201).await;
	let record = exited_record(Some(format!("file://{}", picture.display())));

	client(&base_url, PayloadFormat::Multipart)
		.submit(&record, "tok-123")
		.await
		.unwrap();

	let request = server.await.unwrap();
	assert!(request.head.starts_with("post /api/pointing http/1.1"));
	assert!(request.head.contains("authorization: bearer tok-123"));
	assert!(request.head.contains("content-type: multipart/form-data"));

	let body = request.body_text();
	for field in [
		"objectCode",
		"objectType",
		"creator",
		"projectCode",
		"comment",
		"state",
		"beginDate",
		"endDate",
		"latitude",
		"longitude",
		"timezone",
	] {
		assert!(
			body.contains(&format!("name=\"{}\"", field)),
			"missing field {}",
			field
		);
	}
	assert!(body.contains("CRATE-1"));
	assert!(body.contains("2024-05-02T08:00:00.000Z"));
	assert!(body.contains("2024-05-02T09:30:00.000Z"));
	assert!(body.contains("filename=\"photo.jpg\""));
	assert!(body.contains("image/jpeg"));
	assert!(body.contains("JPEG-BYTES-FOR-TEST"));
	assert!(!body.contains("synced"));
}

#[tokio::test]
async fn missing_picture_is_left_out() {
	let dir = tempfile::tempdir().unwrap();
	let gone = dir.path().join("deleted.jpg");

	let (base_url, server) = serve_once(200).await;
	let record = exited_record(Some(gone.display().to_string()));

	client(&base_url, PayloadFormat::Multipart)
		.submit(&record, "tok-123")
		.await
		.unwrap();

	let body = server.await.unwrap().body_text();
	assert!(body.contains("name=\"objectCode\""));
	assert!(!body.contains("photo.jpg"));
}

#[tokio::test]
async fn uploaded_picture_is_not_sent_again() {
	let dir = tempfile::tempdir().unwrap();
	let picture = dir.path().join("entry.jpg");
	tokio::fs::write(&picture, b"ENTRY-PHOTO").await.unwrap();

	// Entry with its photo already accepted, then exited without a new one
	let begin = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
	let mut record = Record::builder("CRATE-2")
		.with_object_type("crate")
		.with_begin_date(begin)
		.with_picture(picture.display().to_string())
		.build()
		.unwrap();
	record.mark_synced();
	record
		.exit(begin + ChronoDuration::minutes(15), None)
		.unwrap();

	let (base_url, server) = serve_once(200).await;
	client(&base_url, PayloadFormat::Multipart)
		.submit(&record, "tok-123")
		.await
		.unwrap();
	let body = server.await.unwrap().body_text();
	assert!(body.contains("name=\"endDate\""));
	assert!(!body.contains("photo.jpg"));
	assert!(!body.contains("ENTRY-PHOTO"));

	let (base_url, server) = serve_once(200).await;
	client(&base_url, PayloadFormat::Json)
		.submit(&record, "tok-123")
		.await
		.unwrap();
	let payload: serde_json::Value = serde_json::from_slice(&server.await.unwrap().body).unwrap();
	assert!(payload.get("picture").is_none());
	assert!(payload.get("pictureSynced").is_none());
}

#[tokio::test]
async fn json_submission_omits_local_flags() {
	let (base_url, server) = serve_once(200).await;
	let record = exited_record(None);

	client(&base_url, PayloadFormat::Json)
		.submit(&record, "tok-123")
		.await
		.unwrap();

	let request = server.await.unwrap();
	assert!(request.head.contains("content-type: application/json"));

	let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
	assert_eq!(payload["objectCode"], "CRATE-1");
	assert_eq!(payload["projectCode"], "PRJ-7");
	assert_eq!(payload["beginDate"], "2024-05-02T08:00:00.000Z");
	assert_eq!(payload["endDate"], "2024-05-02T09:30:00.000Z");
	assert_eq!(payload["latitude"], 36.75);
	assert!(payload.get("synced").is_none());
	assert!(payload.get("picture").is_none());
}

#[tokio::test]
async fn non_success_status_is_a_rejection() {
	let (base_url, server) = serve_once(500).await;

	let result = client(&base_url, PayloadFormat::Json)
		.submit(&exited_record(None), "tok-123")
		.await;

	server.await.unwrap();
	match result {
		Err(SubmitError::Rejected { status: 500 }) => {}
		other => panic!("expected a 500 rejection, got {:?}", other),
	}
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
	// Grab a free port, then close it again
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let base_url = format!("http://{}", listener.local_addr().unwrap());
	drop(listener);

	let result = client(&base_url, PayloadFormat::Json)
		.submit(&exited_record(None), "tok-123")
		.await;

	match result {
		Err(SubmitError::HttpError(_)) => {}
		other => panic!("expected a transport error, got {:?}", other),
	}
}

#[tokio::test]
async fn probe_treats_any_answer_as_online() {
	let (base_url, server) = serve_once(404).await;
	let probe = HttpConnectivityProbe::new(&base_url, Duration::from_secs(2)).unwrap();

	let state = probe.network_state().await;

	assert!(state.can_sync());
	assert!(server.await.unwrap().head.starts_with("head / http/1.1"));
}
