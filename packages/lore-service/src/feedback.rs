use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::{Error, Result};

/// Append-only JSONL sink for user feedback. Appends are serialized so lines never interleave.
pub struct FeedbackLog {
	path: PathBuf,
	lock: Mutex<()>,
}
impl FeedbackLog {
	pub fn new(path: PathBuf) -> Self {
		Self { path, lock: Mutex::new(()) }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Stamps the payload with `ts` and appends it as one line. Returns the stored record.
	pub async fn append(&self, payload: Value) -> Result<Value> {
		let mut record = match payload {
			Value::Object(map) => map,
			other => {
				let mut map = Map::new();

				map.insert("payload".to_string(), other);

				map
			},
		};
		let ts = OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0;

		record.insert("ts".to_string(), Value::from(ts));

		let record = Value::Object(record);
		let mut line = serde_json::to_string(&record).map_err(feedback_error)?;

		line.push('\n');

		let _guard = self.lock.lock().await;

		if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await.map_err(feedback_error)?;
		}

		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await
			.map_err(feedback_error)?;

		file.write_all(line.as_bytes()).await.map_err(feedback_error)?;
		file.flush().await.map_err(feedback_error)?;

		Ok(record)
	}
}

fn feedback_error(err: impl std::fmt::Display) -> Error {
	Error::Feedback { message: err.to_string() }
}
