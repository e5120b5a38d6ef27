//! The studio: one owner for everything the user edits, driven by
//! [`StudioAction`] messages.

use std::sync::Arc;

use chrono::{DateTime, Local};
use dig_contracts::attachments::{Attachment, AttachmentManager, RawFile};
use dig_contracts::composer::compose;
use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::events::{EventKind, EventWriter};
use dig_contracts::parts::GenerationResult;
use dig_contracts::presets::{AspectRatio, Preset, PresetRegistry, CUSTOM_PRESET};
use dig_contracts::share::{build_artifacts, GeneratedImage};
use dig_contracts::store::RecentPrompts;
use serde_json::json;

use crate::pipeline::{Pipeline, PipelineStatus, SubmitOutcome, Ticket};
use crate::recorder::{hand_off, GenerationRecorder, RecordSummary};

#[derive(Debug)]
pub enum StudioAction {
    EditText(String),
    SelectPreset(String),
    ApplyCustom(String),
    SetAspectRatio(AspectRatio),
    AddFiles(Vec<RawFile>),
    RemoveAttachment(usize),
    ClearAttachments,
    Submit,
    ClearResults,
}

pub struct Studio {
    presets: PresetRegistry,
    pipeline: Arc<Pipeline>,
    attachments: AttachmentManager,
    text: String,
    active_preset: Option<String>,
    custom_snippet: String,
    aspect_ratio: AspectRatio,
    saved_prompt: Option<String>,
    result: Option<GenerationResult>,
    result_ticket: Option<Ticket>,
    last_error: Option<DigError>,
    last_record: Option<RecordSummary>,
    user_id: String,
    recorder: Option<Arc<dyn GenerationRecorder>>,
    recents: Option<RecentPrompts>,
    events: Option<EventWriter>,
}

impl Studio {
    pub fn new(presets: PresetRegistry, pipeline: Arc<Pipeline>) -> Self {
        Self {
            presets,
            pipeline,
            attachments: AttachmentManager::default(),
            text: String::new(),
            active_preset: None,
            custom_snippet: String::new(),
            aspect_ratio: AspectRatio::default(),
            saved_prompt: None,
            result: None,
            result_ticket: None,
            last_error: None,
            last_record: None,
            user_id: "local".to_string(),
            recorder: None,
            recents: None,
            events: None,
        }
    }

    pub fn with_recorder(
        mut self,
        user_id: impl Into<String>,
        recorder: Arc<dyn GenerationRecorder>,
    ) -> Self {
        self.user_id = user_id.into();
        self.recorder = Some(recorder);
        self
    }

    pub fn with_recents(mut self, recents: RecentPrompts) -> Self {
        self.recents = Some(recents);
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dispatch(&mut self, action: StudioAction) -> DigResult<()> {
        match action {
            StudioAction::EditText(text) => {
                self.text = text;
                self.pipeline.reset();
            }
            StudioAction::SelectPreset(key) => {
                let key = key.trim().to_ascii_lowercase();
                let ratio = self.presets.get(&key)?.ratio;
                if key != CUSTOM_PRESET {
                    self.custom_snippet.clear();
                }
                self.active_preset = Some(key);
                self.aspect_ratio = ratio;
            }
            StudioAction::ApplyCustom(text) => {
                let snippet = text.trim();
                if !snippet.is_empty() {
                    self.custom_snippet = snippet.to_string();
                    self.aspect_ratio = self.presets.get(CUSTOM_PRESET)?.ratio;
                    self.active_preset = Some(CUSTOM_PRESET.to_string());
                }
            }
            StudioAction::SetAspectRatio(ratio) => {
                self.aspect_ratio = ratio;
            }
            StudioAction::AddFiles(files) => {
                let names: Vec<String> = files.iter().map(|file| file.name.clone()).collect();
                if let Err(err) = self.attachments.add_files(files) {
                    self.log(
                        EventKind::AttachmentsRejected,
                        json!({ "files": names, "error": err.to_string() }),
                    );
                    return Err(err);
                }
                self.pipeline.reset();
            }
            StudioAction::RemoveAttachment(index) => {
                self.attachments.remove_at(index)?;
            }
            StudioAction::ClearAttachments => self.attachments.clear(),
            StudioAction::Submit => return self.submit(),
            StudioAction::ClearResults => {
                self.result = None;
                self.saved_prompt = None;
                self.last_error = None;
                self.last_record = None;
                self.pipeline.reset();
            }
        }
        Ok(())
    }

    fn submit(&mut self) -> DigResult<()> {
        let trimmed = self.text.trim().to_string();
        if trimmed.is_empty() {
            self.last_error = Some(DigError::EmptyPrompt);
            return Err(DigError::EmptyPrompt);
        }
        let final_prompt = compose(
            &self.presets,
            &trimmed,
            self.active_preset.as_deref(),
            &self.custom_snippet,
        )?;

        let outcome = self
            .pipeline
            .submit(&final_prompt, &self.attachments, self.aspect_ratio);
        let submission = match outcome {
            Ok(SubmitOutcome::Published(submission)) => submission,
            Ok(SubmitOutcome::Discarded { .. }) => return Ok(()),
            Err(err) => {
                self.last_error = Some(err.clone());
                return Err(err);
            }
        };
        if self
            .result_ticket
            .is_some_and(|shown| shown > submission.ticket)
        {
            return Ok(());
        }

        if let Some(recents) = &self.recents {
            recents.add(&trimmed);
        }
        self.last_record = self.recorder.as_deref().and_then(|recorder| {
            hand_off(
                recorder,
                &self.user_id,
                &submission.request,
                &submission.result,
                self.events.as_ref(),
            )
        });
        self.saved_prompt = Some(trimmed);
        self.result = Some(submission.result);
        self.result_ticket = Some(submission.ticket);
        self.last_error = None;
        Ok(())
    }

    fn log(&self, kind: EventKind, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            events.record(kind, payload);
        }
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn active_preset(&self) -> Option<&str> {
        self.active_preset.as_deref()
    }

    /// The selected preset when it has a fixed template.
    pub fn fixed_preset(&self) -> Option<&Preset> {
        self.active_preset
            .as_deref()
            .and_then(|key| self.presets.get(key).ok())
            .filter(|preset| !preset.is_custom())
    }

    pub fn custom_snippet(&self) -> &str {
        &self.custom_snippet
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn attachments(&self) -> &[Attachment] {
        self.attachments.attachments()
    }

    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    pub fn transport(&self) -> &str {
        self.pipeline.transport()
    }

    /// What the user typed for the shown result, without preset text.
    pub fn saved_prompt(&self) -> Option<&str> {
        self.saved_prompt.as_deref()
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&DigError> {
        self.last_error.as_ref()
    }

    pub fn last_record(&self) -> Option<&RecordSummary> {
        self.last_record.as_ref()
    }

    pub fn artifacts(&self, at: &DateTime<Local>) -> Vec<GeneratedImage> {
        match &self.result {
            Some(result) => build_artifacts(
                result,
                self.saved_prompt.as_deref().unwrap_or_default(),
                self.fixed_preset(),
                at,
            ),
            None => Vec::new(),
        }
    }
}
