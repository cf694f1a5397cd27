use serde::{Deserialize, Serialize};

/// Speaker label used when no diarization is available.
pub const UNKNOWN_SPEAKER: &str = "UNKNOWN";

/// Gaps longer than this between segments are reported as pauses.
const PAUSE_THRESHOLD_S: f64 = 0.7;

/// One normalized span of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// `[MM:SS.mmm - MM:SS.mmm] [SPEAKER] text`
    pub fn render(&self) -> String {
        format!(
            "[{} - {}] [{}] {}",
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.speaker,
            self.text
        )
    }
}

/// A word with timing and an optional diarization label.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub speaker: Option<u32>,
}

/// Formats seconds as `MM:SS.mmm`. Minutes keep counting past an hour.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let minutes = total_ms / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{minutes:02}:{secs:02}.{millis:03}")
}

/// Groups consecutive words by speaker into sentence-cased segments.
pub fn segments_from_words(words: &[TimedWord]) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut turn: Vec<&TimedWord> = Vec::new();

    for word in words.iter().filter(|w| !w.text.trim().is_empty()) {
        if let Some(last) = turn.last()
            && last.speaker != word.speaker
        {
            segments.push(close_turn(&turn));
            turn.clear();
        }
        turn.push(word);
    }
    if !turn.is_empty() {
        segments.push(close_turn(&turn));
    }
    segments
}

fn close_turn(turn: &[&TimedWord]) -> TranscriptSegment {
    let text = turn
        .iter()
        .map(|w| w.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    let speaker = match turn[0].speaker {
        Some(n) => format!("Speaker {n}"),
        None => UNKNOWN_SPEAKER.to_string(),
    };
    TranscriptSegment::new(
        turn[0].start,
        turn[turn.len() - 1].end,
        speaker,
        sentence_case(&text),
    )
}

fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    if !out.ends_with(['.', '?', '!']) {
        out.push('.');
    }
    out
}

/// Renders every segment as one line.
pub fn render_transcript(segments: &[TranscriptSegment]) -> Vec<String> {
    segments.iter().map(TranscriptSegment::render).collect()
}

/// Pauses between segments and immediately repeated words.
pub fn speech_events(segments: &[TranscriptSegment]) -> Vec<String> {
    let mut events = Vec::new();
    for pair in segments.windows(2) {
        let gap = pair[1].start - pair[0].end;
        if gap > PAUSE_THRESHOLD_S {
            events.push(format!("Pause {gap:.2}s at {}", format_timestamp(pair[0].end)));
        }
    }
    for segment in segments {
        let words: Vec<String> = segment
            .text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        for pair in words.windows(2) {
            if pair[0] == pair[1] {
                events.push(format!(
                    "Stutter '{}' at {}",
                    pair[0],
                    format_timestamp(segment.start)
                ));
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64, speaker: Option<u32>) -> TimedWord {
        TimedWord {
            text: text.into(),
            start,
            end,
            speaker,
        }
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0.0), "00:00.000");
        assert_eq!(format_timestamp(61.5), "01:01.500");
        assert_eq!(format_timestamp(59.9996), "01:00.000");
        assert_eq!(format_timestamp(3725.25), "62:05.250");
        assert_eq!(format_timestamp(-3.0), "00:00.000");
        assert_eq!(format_timestamp(f64::NAN), "00:00.000");
    }

    #[test]
    fn segment_rendering() {
        let seg = TranscriptSegment::new(1.25, 3.0, "Speaker 2", "Hello there.");
        assert_eq!(seg.render(), "[00:01.250 - 00:03.000] [Speaker 2] Hello there.");
    }

    #[test]
    fn words_are_grouped_by_speaker_turn() {
        let words = vec![
            word("hello", 0.0, 0.4, Some(1)),
            word("there", 0.5, 0.9, Some(1)),
            word("hi", 1.2, 1.4, Some(2)),
            word("how", 1.5, 1.7, Some(2)),
            word("are", 1.7, 1.8, Some(2)),
            word("you?", 1.8, 2.1, Some(2)),
            word("fine", 2.5, 2.9, Some(1)),
        ];
        let segments = segments_from_words(&words);
        assert_eq!(
            render_transcript(&segments),
            vec![
                "[00:00.000 - 00:00.900] [Speaker 1] Hello there.",
                "[00:01.200 - 00:02.100] [Speaker 2] Hi how are you?",
                "[00:02.500 - 00:02.900] [Speaker 1] Fine.",
            ]
        );
    }

    #[test]
    fn unlabelled_words_use_unknown_speaker() {
        let segments = segments_from_words(&[word("ok", 0.0, 0.2, None)]);
        assert_eq!(segments[0].speaker, UNKNOWN_SPEAKER);
    }

    #[test]
    fn empty_words_produce_no_segments() {
        assert!(segments_from_words(&[word("  ", 0.0, 0.1, Some(1))]).is_empty());
    }

    #[test]
    fn pauses_and_stutters() {
        let segments = vec![
            TranscriptSegment::new(0.0, 1.0, "Speaker 1", "I I think so."),
            TranscriptSegment::new(1.3, 2.0, "Speaker 2", "Right."),
            TranscriptSegment::new(3.5, 4.0, "Speaker 1", "Yes."),
        ];
        let events = speech_events(&segments);
        assert_eq!(
            events,
            vec![
                "Pause 1.50s at 00:02.000".to_string(),
                "Stutter 'i' at 00:00.000".to_string(),
            ]
        );
    }
}
