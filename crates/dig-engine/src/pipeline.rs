//! Submit → encode → send → classify → publish.
//!
//! A [`Pipeline`] runs at most one submission at a time. Every accepted
//! submission gets a ticket; only the holder of the current ticket may move
//! the pipeline out of `Submitting`, so a reply from an abandoned submission
//! is reported as discarded instead of replacing a newer result.

use std::sync::{Arc, Mutex, MutexGuard};

use dig_contracts::attachments::AttachmentManager;
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::events::{EventKind, EventWriter};
use dig_contracts::parts::{normalize_reply, GenerationResult};
use dig_contracts::presets::AspectRatio;
use dig_contracts::request::{EncodedImage, OutboundRequest};
use serde_json::{json, Value};

use crate::boundary::ModelBoundary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// A published generation plus the exact request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub ticket: Ticket,
    pub request: OutboundRequest,
    pub result: GenerationResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Published(Submission),
    /// The submission was abandoned while in flight; its reply was dropped.
    Discarded { ticket: Ticket },
}

#[derive(Debug)]
struct PipelineState {
    status: PipelineStatus,
    issued: u64,
    current: Option<Ticket>,
}

pub struct Pipeline {
    boundary: Arc<dyn ModelBoundary>,
    state: Arc<Mutex<PipelineState>>,
    events: Option<EventWriter>,
}

impl Pipeline {
    pub fn new(boundary: Arc<dyn ModelBoundary>) -> Self {
        Self {
            boundary,
            state: Arc::new(Mutex::new(PipelineState {
                status: PipelineStatus::Idle,
                issued: 0,
                current: None,
            })),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn transport(&self) -> &str {
        self.boundary.name()
    }

    pub fn status(&self) -> PipelineStatus {
        lock(&self.state).status
    }

    /// Back to `Idle` after a finished submission. No effect while one is
    /// in flight.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        if state.status != PipelineStatus::Submitting {
            state.status = PipelineStatus::Idle;
        }
    }

    /// Gives up on the in-flight submission. Its reply, whenever it
    /// arrives, will be discarded and the pipeline accepts new work.
    pub fn abandon(&self) -> Option<Ticket> {
        let mut state = lock(&self.state);
        if state.status != PipelineStatus::Submitting {
            return None;
        }
        state.status = PipelineStatus::Idle;
        state.current.take()
    }

    pub fn submit(
        &self,
        final_prompt: &str,
        attachments: &AttachmentManager,
        aspect_ratio: AspectRatio,
    ) -> DigResult<SubmitOutcome> {
        let flight = self.begin()?;
        self.record(
            EventKind::GenerationStarted,
            json!({
                "ticket": flight.ticket.0,
                "transport": self.boundary.name(),
                "prompt_chars": final_prompt.chars().count(),
                "image_count": attachments.len(),
                "aspect_ratio": aspect_ratio.as_str(),
            }),
        );
        let outcome = attachments
            .encode_all()
            .and_then(|images| self.exchange(final_prompt, images, aspect_ratio));
        self.finish(flight, outcome)
    }

    /// Same as [`submit`](Self::submit) for callers that already hold
    /// encoded images.
    pub fn submit_encoded(
        &self,
        final_prompt: &str,
        images: Vec<EncodedImage>,
        aspect_ratio: AspectRatio,
    ) -> DigResult<SubmitOutcome> {
        let flight = self.begin()?;
        self.record(
            EventKind::GenerationStarted,
            json!({
                "ticket": flight.ticket.0,
                "transport": self.boundary.name(),
                "prompt_chars": final_prompt.chars().count(),
                "image_count": images.len(),
                "aspect_ratio": aspect_ratio.as_str(),
            }),
        );
        let outcome = self.exchange(final_prompt, images, aspect_ratio);
        self.finish(flight, outcome)
    }

    fn begin(&self) -> DigResult<InFlight> {
        let mut state = lock(&self.state);
        if state.status == PipelineStatus::Submitting {
            return Err(DigError::AlreadySubmitting);
        }
        state.issued += 1;
        let ticket = Ticket(state.issued);
        state.current = Some(ticket);
        state.status = PipelineStatus::Submitting;
        Ok(InFlight {
            ticket,
            state: Arc::clone(&self.state),
            settled: false,
        })
    }

    fn exchange(
        &self,
        final_prompt: &str,
        images: Vec<EncodedImage>,
        aspect_ratio: AspectRatio,
    ) -> DigResult<(OutboundRequest, GenerationResult)> {
        let request = OutboundRequest {
            prompt: final_prompt.to_string(),
            images,
            aspect_ratio,
        };
        request.validate()?;
        let reply = self.boundary.generate(&request)?;
        let result = normalize_reply(&reply)?;
        Ok((request, result))
    }

    fn finish(
        &self,
        mut flight: InFlight,
        outcome: DigResult<(OutboundRequest, GenerationResult)>,
    ) -> DigResult<SubmitOutcome> {
        let ticket = flight.ticket;
        let status = match &outcome {
            Ok(_) => PipelineStatus::Succeeded,
            Err(_) => PipelineStatus::Failed,
        };
        let current = flight.settle(status);

        match outcome {
            Ok(_) if !current => {
                self.record(
                    EventKind::GenerationDiscarded,
                    json!({ "ticket": ticket.0 }),
                );
                Ok(SubmitOutcome::Discarded { ticket })
            }
            Ok((request, result)) => {
                self.record(
                    EventKind::GenerationSucceeded,
                    json!({
                        "ticket": ticket.0,
                        "text_chars": result.texts.chars().count(),
                        "image_count": result.images.len(),
                        "shape": result.shape,
                    }),
                );
                Ok(SubmitOutcome::Published(Submission {
                    ticket,
                    request,
                    result,
                }))
            }
            Err(err) => {
                let mut payload = json!({
                    "ticket": ticket.0,
                    "error": err.to_string(),
                    "validation": err.is_validation(),
                });
                if !current {
                    payload["abandoned"] = Value::Bool(true);
                }
                self.record(EventKind::GenerationFailed, payload);
                Err(err)
            }
        }
    }

    fn record(&self, kind: EventKind, payload: Value) {
        if let Some(events) = &self.events {
            events.record(kind, payload);
        }
    }
}

/// Holds the `Submitting` slot for one ticket. Dropping it unsettled (a
/// panic in a transport) marks the submission failed.
struct InFlight {
    ticket: Ticket,
    state: Arc<Mutex<PipelineState>>,
    settled: bool,
}

impl InFlight {
    /// Returns whether this ticket was still current.
    fn settle(&mut self, status: PipelineStatus) -> bool {
        self.settled = true;
        let mut state = lock(&self.state);
        if state.current != Some(self.ticket) {
            return false;
        }
        state.status = status;
        true
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(PipelineStatus::Failed);
        }
    }
}

fn lock(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use dig_contracts::attachments::{RawFile, MAX_ATTACHMENT_BYTES};
    use dig_contracts::codec;

    use super::*;

    /// Replays canned replies and remembers every request it was sent.
    #[derive(Default)]
    struct ScriptedBoundary {
        replies: Mutex<VecDeque<DigResult<Value>>>,
        sent: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedBoundary {
        fn with(replies: Vec<DigResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<OutboundRequest> {
            self.sent.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl ModelBoundary for ScriptedBoundary {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, request: &OutboundRequest) -> DigResult<Value> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(request.clone());
            }
            self.replies
                .lock()
                .ok()
                .and_then(|mut replies| replies.pop_front())
                .unwrap_or_else(|| Ok(json!({})))
        }
    }

    /// Blocks inside `generate` until the test releases it.
    struct GatedBoundary {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        calls: AtomicUsize,
        gate_first_only: bool,
    }

    impl ModelBoundary for GatedBoundary {
        fn name(&self) -> &str {
            "gated"
        }

        fn generate(&self, request: &OutboundRequest) -> DigResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 || !self.gate_first_only {
                if let Ok(entered) = self.entered.lock() {
                    let _ = entered.send(());
                }
                if let Ok(release) = self.release.lock() {
                    let _ = release.recv_timeout(Duration::from_secs(10));
                }
            }
            Ok(json!({"parts": [{"type": "text", "text": request.prompt}]}))
        }
    }

    fn gated(gate_first_only: bool) -> (Arc<GatedBoundary>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let boundary = Arc::new(GatedBoundary {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            calls: AtomicUsize::new(0),
            gate_first_only,
        });
        (boundary, entered_rx, release_tx)
    }

    fn png(name: &str, bytes: &[u8]) -> RawFile {
        RawFile::from_bytes(name, Some("image/png"), bytes.to_vec())
    }

    fn published(outcome: SubmitOutcome) -> anyhow::Result<Submission> {
        match outcome {
            SubmitOutcome::Published(submission) => Ok(submission),
            SubmitOutcome::Discarded { ticket } => {
                anyhow::bail!("ticket {} was discarded", ticket.0)
            }
        }
    }

    #[test]
    fn text_only_submission_succeeds() -> anyhow::Result<()> {
        let boundary = ScriptedBoundary::with(vec![Ok(json!({
            "parts": [
                {"type": "text", "text": "hi"},
                {"type": "image", "mimeType": "image/png", "data": "aGVsbG8="},
            ]
        }))]);
        let pipeline = Pipeline::new(boundary.clone());
        let attachments = AttachmentManager::default();

        let submission = published(pipeline.submit("hello", &attachments, AspectRatio::Square)?)?;
        assert_eq!(submission.result.texts, "hi");
        assert_eq!(
            submission.result.images,
            vec!["data:image/png;base64,aGVsbG8="]
        );
        assert_eq!(pipeline.status(), PipelineStatus::Succeeded);
        assert_eq!(boundary.sent().len(), 1);
        assert!(boundary.sent()[0].images.is_empty());

        pipeline.reset();
        assert_eq!(pipeline.status(), PipelineStatus::Idle);
        Ok(())
    }

    #[test]
    fn empty_reply_is_an_empty_result() -> anyhow::Result<()> {
        let pipeline = Pipeline::new(ScriptedBoundary::with(vec![Ok(json!({}))]));
        let submission = published(pipeline.submit(
            "hello",
            &AttachmentManager::default(),
            AspectRatio::Wide,
        )?)?;
        assert!(submission.result.is_empty());
        assert_eq!(pipeline.status(), PipelineStatus::Succeeded);
        Ok(())
    }

    #[test]
    fn outbound_images_follow_insertion_order() -> anyhow::Result<()> {
        let boundary = ScriptedBoundary::with(Vec::new());
        let pipeline = Pipeline::new(boundary.clone());
        let mut attachments = AttachmentManager::default();
        attachments.add_files(vec![png("a.png", b"A"), png("x.png", b"X")])?;
        attachments.add_files(vec![png("b.png", b"B")])?;
        attachments.remove_at(1)?;
        attachments.add_files(vec![png("c.png", b"C")])?;

        pipeline.submit("order", &attachments, AspectRatio::Square)?;
        let sent = boundary.sent();
        let payloads: Vec<String> = sent[0].images.iter().map(|image| image.data.clone()).collect();
        assert_eq!(
            payloads,
            vec![codec::encode(b"A"), codec::encode(b"B"), codec::encode(b"C")]
        );
        Ok(())
    }

    #[test]
    fn encoding_failure_aborts_before_sending() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("gone.png");
        std::fs::write(&path, b"png")?;
        let boundary = ScriptedBoundary::with(Vec::new());
        let pipeline = Pipeline::new(boundary.clone());
        let mut attachments = AttachmentManager::default();
        attachments.add_files(vec![png("ok.png", b"ok"), RawFile::from_path(&path)?])?;
        std::fs::remove_file(&path)?;

        let err = pipeline
            .submit("fox", &attachments, AspectRatio::Square)
            .err();
        assert!(matches!(err, Some(DigError::EncodingFailed { index: 1, .. })));
        assert!(boundary.sent().is_empty());
        assert_eq!(pipeline.status(), PipelineStatus::Failed);
        Ok(())
    }

    #[test]
    fn oversized_encoded_image_is_rejected_before_sending() {
        let boundary = ScriptedBoundary::with(Vec::new());
        let pipeline = Pipeline::new(boundary.clone());
        let images = vec![EncodedImage {
            mime_type: "image/png".to_string(),
            data: codec::encode(&vec![0u8; MAX_ATTACHMENT_BYTES as usize + 1]),
        }];
        assert!(matches!(
            pipeline.submit_encoded("fox", images, AspectRatio::Square),
            Err(DigError::AttachmentTooLarge { .. })
        ));
        assert!(boundary.sent().is_empty());
    }

    #[test]
    fn remote_failure_is_surfaced_and_pipeline_recovers() -> anyhow::Result<()> {
        let boundary = ScriptedBoundary::with(vec![
            Err(DigError::remote(
                "generateContent failed",
                Some(json!({"status": 500})),
            )),
            Ok(json!({"parts": [{"type": "text", "text": "second try"}]})),
        ]);
        let pipeline = Pipeline::new(boundary.clone());
        let attachments = AttachmentManager::default();

        let err = pipeline.submit("fox", &attachments, AspectRatio::Square).err();
        assert_eq!(
            err.map(|err| err.to_string()),
            Some("generateContent failed ({\"status\":500})".to_string())
        );
        assert_eq!(pipeline.status(), PipelineStatus::Failed);

        let retry = published(pipeline.submit("fox", &attachments, AspectRatio::Square)?)?;
        assert_eq!(retry.result.texts, "second try");
        assert_eq!(retry.ticket, Ticket(2));
        assert_eq!(boundary.sent().len(), 2);
        Ok(())
    }

    #[test]
    fn malformed_reply_image_fails_the_submission() {
        let pipeline = Pipeline::new(ScriptedBoundary::with(vec![Ok(json!({
            "parts": [{"type": "image", "data": "%%%"}]
        }))]));
        assert!(matches!(
            pipeline.submit("fox", &AttachmentManager::default(), AspectRatio::Square),
            Err(DigError::MalformedEncoding(_))
        ));
        assert_eq!(pipeline.status(), PipelineStatus::Failed);
    }

    #[test]
    fn concurrent_submit_is_rejected_without_a_second_send() -> anyhow::Result<()> {
        let (boundary, entered, release) = gated(false);
        let pipeline = Arc::new(Pipeline::new(boundary.clone()));

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                pipeline.submit_encoded("first", Vec::new(), AspectRatio::Square)
            })
        };
        entered.recv_timeout(Duration::from_secs(10))?;
        assert_eq!(pipeline.status(), PipelineStatus::Submitting);

        let second = pipeline.submit_encoded("second", Vec::new(), AspectRatio::Square);
        assert_eq!(second, Err(DigError::AlreadySubmitting));
        assert_eq!(boundary.calls.load(Ordering::SeqCst), 1);

        release.send(())?;
        let first = worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        assert_eq!(published(first)?.result.texts, "first");
        assert_eq!(pipeline.status(), PipelineStatus::Succeeded);
        Ok(())
    }

    #[test]
    fn abandoned_reply_never_overwrites_newer_result() -> anyhow::Result<()> {
        let (boundary, entered, release) = gated(true);
        let pipeline = Arc::new(Pipeline::new(boundary.clone()));

        let worker = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.submit_encoded("stale", Vec::new(), AspectRatio::Square))
        };
        entered.recv_timeout(Duration::from_secs(10))?;
        assert_eq!(pipeline.abandon(), Some(Ticket(1)));
        assert_eq!(pipeline.status(), PipelineStatus::Idle);

        let fresh = published(pipeline.submit_encoded("fresh", Vec::new(), AspectRatio::Square)?)?;
        assert_eq!(fresh.ticket, Ticket(2));

        release.send(())?;
        let stale = worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        assert_eq!(stale, SubmitOutcome::Discarded { ticket: Ticket(1) });
        assert_eq!(pipeline.status(), PipelineStatus::Succeeded);
        Ok(())
    }

    #[test]
    fn events_trace_each_submission() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let pipeline = Pipeline::new(ScriptedBoundary::with(vec![
            Ok(json!({"parts": [{"type": "text", "text": "ok"}]})),
            Err(DigError::remote("boom", None)),
        ]))
        .with_events(EventWriter::new(&events_path, "session-1"));
        let attachments = AttachmentManager::default();

        pipeline.submit("one", &attachments, AspectRatio::Square)?;
        assert!(pipeline.submit("two", &attachments, AspectRatio::Square).is_err());

        let raw = std::fs::read_to_string(events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec![
                "generation_started",
                "generation_succeeded",
                "generation_started",
                "generation_failed",
            ]
        );
        assert_eq!(rows[1]["shape"], json!("direct_parts"));
        assert_eq!(rows[3]["error"], json!("boom"));
        Ok(())
    }
}
