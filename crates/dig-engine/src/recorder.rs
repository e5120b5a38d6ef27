use anyhow::Context;
use dig_contracts::codec;
use dig_contracts::events::{EventKind, EventWriter};
use dig_contracts::parts::GenerationResult;
use dig_contracts::request::OutboundRequest;
use dig_contracts::share::infer_extension;
use dig_contracts::store::{ImageKind, LocalStore};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub record_id: String,
    pub inputs: usize,
    pub outputs: usize,
    pub skipped: usize,
}

/// Receives finished generations for history. Implementations may fail;
/// callers go through [`hand_off`], which never lets a failure escape.
pub trait GenerationRecorder: Send + Sync {
    fn record(
        &self,
        user_id: &str,
        request: &OutboundRequest,
        result: &GenerationResult,
    ) -> anyhow::Result<RecordSummary>;
}

/// Writes records, blobs and image links into a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct StoreRecorder {
    store: LocalStore,
}

impl StoreRecorder {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

impl GenerationRecorder for StoreRecorder {
    fn record(
        &self,
        user_id: &str,
        request: &OutboundRequest,
        result: &GenerationResult,
    ) -> anyhow::Result<RecordSummary> {
        let record = self.store.create_record(user_id, &request.prompt)?;
        let mut links: Vec<(ImageKind, String)> = Vec::new();
        let mut skipped = 0usize;

        for (idx, image) in request.images.iter().enumerate() {
            let resource = codec::to_resource(&image.mime_type, &image.data);
            match upload(&self.store, user_id, &record.id, ImageKind::Input, &resource) {
                Ok(url) => links.push((ImageKind::Input, url)),
                Err(err) => {
                    skipped += 1;
                    eprintln!("dig warning: skipped input image {idx}: {err:#}");
                }
            }
        }
        for (idx, resource) in result.images.iter().enumerate() {
            match upload(&self.store, user_id, &record.id, ImageKind::Output, resource) {
                Ok(url) => links.push((ImageKind::Output, url)),
                Err(err) => {
                    skipped += 1;
                    eprintln!("dig warning: skipped output image {idx}: {err:#}");
                }
            }
        }

        let rows = self.store.attach_images(&record.id, &links)?;
        let inputs = rows
            .iter()
            .filter(|row| row.image_type == ImageKind::Input)
            .count();
        Ok(RecordSummary {
            record_id: record.id,
            inputs,
            outputs: rows.len() - inputs,
            skipped,
        })
    }
}

fn upload(
    store: &LocalStore,
    user_id: &str,
    record_id: &str,
    kind: ImageKind,
    resource: &str,
) -> anyhow::Result<String> {
    let (_, bytes) = codec::resource_to_bytes(resource)
        .with_context(|| format!("{} image is not decodable", kind.as_str()))?;
    store.upload_image(user_id, record_id, kind, infer_extension(resource), &bytes)
}

/// Best-effort hand-off: logs the outcome and swallows any failure.
pub fn hand_off(
    recorder: &dyn GenerationRecorder,
    user_id: &str,
    request: &OutboundRequest,
    result: &GenerationResult,
    events: Option<&EventWriter>,
) -> Option<RecordSummary> {
    match recorder.record(user_id, request, result) {
        Ok(summary) => {
            if let Some(events) = events {
                events.record(
                    EventKind::GenerationRecorded,
                    json!({
                        "record_id": summary.record_id,
                        "inputs": summary.inputs,
                        "outputs": summary.outputs,
                        "skipped": summary.skipped,
                    }),
                );
            }
            Some(summary)
        }
        Err(err) => {
            eprintln!("dig warning: failed to save generation: {err:#}");
            if let Some(events) = events {
                events.record(
                    EventKind::RecordFailed,
                    json!({ "error": format!("{err:#}") }),
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use dig_contracts::presets::AspectRatio;
    use dig_contracts::request::EncodedImage;

    use super::*;

    struct FailingRecorder;

    impl GenerationRecorder for FailingRecorder {
        fn record(
            &self,
            _user_id: &str,
            _request: &OutboundRequest,
            _result: &GenerationResult,
        ) -> anyhow::Result<RecordSummary> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn request_with_input() -> OutboundRequest {
        OutboundRequest {
            prompt: "a red fox\n\nstyle".to_string(),
            images: vec![EncodedImage {
                mime_type: "image/jpeg".to_string(),
                data: codec::encode(b"input-bytes"),
            }],
            aspect_ratio: AspectRatio::Portrait,
        }
    }

    #[test]
    fn store_recorder_saves_inputs_then_outputs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let recorder = StoreRecorder::new(store.clone());
        let result = GenerationResult {
            texts: "Here you go".to_string(),
            images: vec![codec::to_resource("image/png", &codec::encode(b"output"))],
            shape: None,
        };

        let summary = recorder.record("alice", &request_with_input(), &result)?;
        assert_eq!((summary.inputs, summary.outputs, summary.skipped), (1, 1, 0));

        let history = store.list_history("alice", 50);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.id, summary.record_id);
        assert_eq!(history[0].record.prompt_text, "a red fox\n\nstyle");
        assert!(history[0].images.inputs[0].ends_with(".jpeg"));
        assert!(history[0].images.outputs[0].ends_with(".png"));
        Ok(())
    }

    #[test]
    fn undecodable_image_is_skipped_not_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = StoreRecorder::new(LocalStore::new(temp.path()));
        let mut request = request_with_input();
        request.images[0].data = "***".to_string();

        let summary = recorder.record("alice", &request, &GenerationResult::default())?;
        assert_eq!((summary.inputs, summary.outputs, summary.skipped), (0, 0, 1));
        Ok(())
    }

    #[test]
    fn hand_off_swallows_failures_and_logs_them() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let events = EventWriter::new(&events_path, "session-1");

        let summary = hand_off(
            &FailingRecorder,
            "alice",
            &request_with_input(),
            &GenerationResult::default(),
            Some(&events),
        );
        assert_eq!(summary, None);

        let raw = std::fs::read_to_string(events_path)?;
        assert!(raw.contains("\"record_failed\""));
        assert!(raw.contains("backend unavailable"));
        Ok(())
    }
}
