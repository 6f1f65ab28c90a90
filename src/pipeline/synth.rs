//! Narration synthesis: speaker voices, audio, and per-word timing marks.
//!
//! Each enriched block is voiced by a synthesis voice picked from its
//! `person_type`, then submitted twice with identical SSML: once for the
//! audio waveform, once for word-level speech marks. The marks come back as
//! newline-delimited JSON events; malformed individual lines are skipped,
//! not fatal, because one bad event should not cost a block its audio.
//!
//! When no engine is configured the stage degrades to a zero-length audio
//! payload and an empty timing sequence — callers must treat empty results
//! as a valid outcome, not an error.

use crate::model::{PersonType, TimingMark};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_polly::types::{Engine, OutputFormat, SpeechMarkType, TextType, VoiceId};
use aws_sdk_polly::Client as PollyClient;
use bytes::Bytes;
use tracing::{debug, warn};

/// The fixed set of synthesis voices the pipeline selects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationVoice {
    Justin,
    Matthew,
    Ivy,
    Kimberly,
    Joey,
    Joanna,
}

impl NarrationVoice {
    /// The default narrator for non-dialog text and unknown speakers.
    pub const NARRATOR: NarrationVoice = NarrationVoice::Joanna;

    /// Resolve a block's `person_type` to a voice, case-insensitively.
    ///
    /// `None`, the literal "null", and unrecognized categories all fall
    /// back to the default narrator.
    pub fn for_person_type(person_type: Option<&str>) -> Self {
        let Some(parsed) = person_type.and_then(PersonType::parse) else {
            return Self::NARRATOR;
        };
        match parsed {
            PersonType::YoungBoy => NarrationVoice::Justin,
            PersonType::OldMan => NarrationVoice::Matthew,
            PersonType::YoungGirl => NarrationVoice::Ivy,
            PersonType::OldWoman => NarrationVoice::Kimberly,
            PersonType::MiddleAgedMan => NarrationVoice::Joey,
            PersonType::MiddleAgedWoman => NarrationVoice::Joanna,
        }
    }

    /// The provider-side voice identifier.
    pub fn id(&self) -> &'static str {
        match self {
            NarrationVoice::Justin => "Justin",
            NarrationVoice::Matthew => "Matthew",
            NarrationVoice::Ivy => "Ivy",
            NarrationVoice::Kimberly => "Kimberly",
            NarrationVoice::Joey => "Joey",
            NarrationVoice::Joanna => "Joanna",
        }
    }
}

/// The speech-synthesis seam.
///
/// Production is [`PollyEngine`]; tests substitute fakes that return canned
/// audio and mark streams. Errors are provider-detail strings; the caller
/// wraps them with page/block context.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Synthesize the SSML to an audio byte stream (MP3).
    async fn synthesize(&self, ssml: &str, voice: NarrationVoice) -> Result<Bytes, String>;

    /// Synthesize the same SSML to a newline-delimited JSON stream of
    /// word-level speech-mark events.
    async fn speech_marks(&self, ssml: &str, voice: NarrationVoice) -> Result<String, String>;
}

/// AWS Polly [`SpeechEngine`] (standard engine, MP3 audio, word marks).
pub struct PollyEngine {
    client: PollyClient,
}

impl PollyEngine {
    /// Connect using the default AWS credential chain (environment, shared
    /// credentials file, IAM role).
    pub async fn connect(region: impl Into<String>) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        Self {
            client: PollyClient::new(&aws_config),
        }
    }

    fn request(
        &self,
        ssml: &str,
        voice: NarrationVoice,
        format: OutputFormat,
    ) -> aws_sdk_polly::operation::synthesize_speech::builders::SynthesizeSpeechFluentBuilder {
        self.client
            .synthesize_speech()
            .engine(Engine::Standard)
            .text(ssml)
            .text_type(TextType::Ssml)
            .voice_id(VoiceId::from(voice.id()))
            .output_format(format)
    }
}

#[async_trait]
impl SpeechEngine for PollyEngine {
    async fn synthesize(&self, ssml: &str, voice: NarrationVoice) -> Result<Bytes, String> {
        let response = self
            .request(ssml, voice, OutputFormat::Mp3)
            .send()
            .await
            .map_err(|e| format!("Polly audio request failed: {e}"))?;

        let collected = response
            .audio_stream
            .collect()
            .await
            .map_err(|e| format!("Failed to read Polly audio stream: {e}"))?;
        let bytes = collected.into_bytes();
        debug!(audio_bytes = bytes.len(), voice = voice.id(), "Synthesized audio");
        Ok(bytes)
    }

    async fn speech_marks(&self, ssml: &str, voice: NarrationVoice) -> Result<String, String> {
        let response = self
            .request(ssml, voice, OutputFormat::Json)
            .speech_mark_types(SpeechMarkType::Word)
            .send()
            .await
            .map_err(|e| format!("Polly speech-mark request failed: {e}"))?;

        let collected = response
            .audio_stream
            .collect()
            .await
            .map_err(|e| format!("Failed to read Polly speech-mark stream: {e}"))?;
        Ok(String::from_utf8_lossy(&collected.into_bytes()).into_owned())
    }
}

/// Parse a newline-delimited JSON speech-mark stream.
///
/// Marks are kept in emission order; individual lines that fail to parse
/// are skipped with a warning.
pub fn parse_speech_marks(stream: &str) -> Vec<TimingMark> {
    let mut marks = Vec::new();
    for line in stream.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TimingMark>(line) {
            Ok(mark) => marks.push(mark),
            Err(e) => warn!("Skipping malformed speech-mark line: {e}"),
        }
    }
    marks
}

/// Produce audio and timing marks for one block's SSML.
///
/// With no engine configured, returns an empty audio payload and an empty
/// mark sequence instead of failing.
pub async fn synthesize_block(
    engine: Option<&dyn SpeechEngine>,
    ssml: &str,
    person_type: Option<&str>,
) -> Result<(Bytes, Vec<TimingMark>), String> {
    let Some(engine) = engine else {
        return Ok((Bytes::new(), Vec::new()));
    };

    let voice = NarrationVoice::for_person_type(person_type);
    let audio = engine.synthesize(ssml, voice).await?;
    let raw_marks = engine.speech_marks(ssml, voice).await?;
    Ok((audio, parse_speech_marks(&raw_marks)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_resolution_is_case_insensitive() {
        assert_eq!(
            NarrationVoice::for_person_type(Some("Young Boy")),
            NarrationVoice::for_person_type(Some("young boy"))
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("OLD WOMAN")),
            NarrationVoice::Kimberly
        );
    }

    #[test]
    fn unknown_and_null_person_types_use_narrator() {
        assert_eq!(
            NarrationVoice::for_person_type(Some("robot")),
            NarrationVoice::NARRATOR
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("null")),
            NarrationVoice::NARRATOR
        );
        assert_eq!(NarrationVoice::for_person_type(None), NarrationVoice::NARRATOR);
    }

    #[test]
    fn each_speaker_category_has_a_distinct_mapping() {
        assert_eq!(
            NarrationVoice::for_person_type(Some("young boy")),
            NarrationVoice::Justin
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("old man")),
            NarrationVoice::Matthew
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("young girl")),
            NarrationVoice::Ivy
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("middle aged man")),
            NarrationVoice::Joey
        );
        assert_eq!(
            NarrationVoice::for_person_type(Some("middle aged woman")),
            NarrationVoice::Joanna
        );
    }

    #[test]
    fn malformed_mark_lines_are_skipped_not_fatal() {
        let stream = concat!(
            r#"{"time":6,"type":"word","start":40,"end":44,"value":"Once"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"time":374,"type":"word","start":45,"end":49,"value":"upon"}"#,
            "\n",
        );
        let marks = parse_speech_marks(stream);
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].value, "Once");
        assert_eq!(marks[1].time, 374);
        assert_eq!(marks[1].start, Some(45));
    }

    #[test]
    fn marks_keep_emission_order() {
        let stream = concat!(
            r#"{"time":100,"type":"word","value":"b"}"#,
            "\n",
            r#"{"time":50,"type":"word","value":"a"}"#,
            "\n",
        );
        let marks = parse_speech_marks(stream);
        // no reordering, even when times are out of order
        assert_eq!(marks[0].value, "b");
        assert_eq!(marks[1].value, "a");
    }

    #[tokio::test]
    async fn missing_engine_degrades_to_empty_results() {
        let (audio, marks) = synthesize_block(None, "<speak>Hi</speak>", Some("young boy"))
            .await
            .unwrap();
        assert!(audio.is_empty());
        assert!(marks.is_empty());
    }
}
