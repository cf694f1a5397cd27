//! Flags transcript wording that closely matches known LLM-style phrases.

use std::path::Path;

use strsim::normalized_levenshtein;

use super::WordFlagger;
use crate::error::{OverwatchError, Result};
use crate::transcription::{TranscriptSegment, format_timestamp};

/// Phrases used when no reference file is configured.
const BUILTIN_PHRASES: &[&str] = &[
    "great question",
    "it's important to note",
    "it is worth noting",
    "delve into",
    "in summary",
    "in conclusion",
    "to summarize",
    "that being said",
    "let me break it down",
    "a testament to",
    "in today's fast-paced world",
    "as an ai language model",
    "furthermore",
    "moreover",
];

#[derive(Debug, Clone)]
pub struct PhraseFlagger {
    phrases: Vec<String>,
    threshold: f64,
    window: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Hit {
    segment: usize,
    at: f64,
    ngram: String,
    phrase: usize,
    similarity: f64,
}

impl PhraseFlagger {
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            threshold: 0.85,
            window: 8,
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_PHRASES.iter().map(|p| p.to_string()).collect())
    }

    /// One phrase per line; blank lines are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            OverwatchError::Config(format!("cannot read phrase list {}: {err}", path.display()))
        })?;
        Ok(Self::new(text.lines().map(str::to_string).collect()))
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// For each starting word, grows the n-gram up to the window and keeps the
    /// first phrase that matches, then moves on to the next starting word.
    fn scan(&self, transcript: &[TranscriptSegment]) -> Vec<Hit> {
        let mut hits = Vec::new();
        for (n, segment) in transcript.iter().enumerate() {
            let words: Vec<String> = segment
                .text
                .split_whitespace()
                .map(normalize_word)
                .filter(|w| !w.is_empty())
                .collect();

            for j in 0..words.len() {
                let longest = self.window.min(words.len() - j);
                'grow: for k in 1..=longest {
                    let ngram = words[j..j + k].join(" ");
                    for (p, phrase) in self.phrases.iter().enumerate() {
                        let similarity = normalized_levenshtein(&ngram, phrase);
                        if similarity >= self.threshold {
                            hits.push(Hit {
                                segment: n + 1,
                                at: segment.start,
                                ngram,
                                phrase: p,
                                similarity,
                            });
                            break 'grow;
                        }
                    }
                }
            }
        }
        hits
    }
}

impl WordFlagger for PhraseFlagger {
    fn flag(&self, transcript: &[TranscriptSegment]) -> Vec<String> {
        let hits = self.scan(transcript);
        if hits.is_empty() {
            return vec!["No LLM-style phrases found.".to_string()];
        }

        let mut lines = vec!["Warning: LLM-style phrases detected:".to_string()];
        for hit in &hits {
            lines.push(format!(
                "  Segment {} [{}]: \"{}\" -> \"{}\" ({:.2}%)",
                hit.segment,
                format_timestamp(hit.at),
                hit.ngram,
                self.phrases[hit.phrase],
                hit.similarity * 100.0
            ));
        }

        let mut counts = vec![0usize; self.phrases.len()];
        for hit in &hits {
            counts[hit.phrase] += 1;
        }
        lines.push("Summary of matched phrases:".to_string());
        for (phrase, count) in self.phrases.iter().zip(counts) {
            if count > 0 {
                lines.push(format!("  \"{phrase}\": {count} occurrence(s)"));
            }
        }
        lines
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(start, start + 2.0, "Speaker 1", text)
    }

    #[test]
    fn exact_phrase_is_flagged_once() {
        let flagger = PhraseFlagger::builtin();
        let lines = flagger.flag(&[segment(61.5, "Honestly, great question.")]);
        assert_eq!(lines[0], "Warning: LLM-style phrases detected:");
        assert_eq!(
            lines[1],
            "  Segment 1 [01:01.500]: \"great question\" -> \"great question\" (100.00%)"
        );
        assert!(lines.contains(&"  \"great question\": 1 occurrence(s)".to_string()));
    }

    #[test]
    fn near_match_above_threshold_is_flagged() {
        let flagger = PhraseFlagger::new(vec!["delve into".into()]);
        let hits = flagger.scan(&[segment(0.0, "Let me delve in to it")]);
        assert!(!hits.is_empty());
        assert!(hits[0].similarity >= 0.85);
    }

    #[test]
    fn clean_transcript_has_no_findings() {
        let flagger = PhraseFlagger::builtin();
        let lines = flagger.flag(&[segment(0.0, "I built the cache layer in Rust last year.")]);
        assert_eq!(lines, vec!["No LLM-style phrases found.".to_string()]);
    }

    #[test]
    fn counts_repeat_occurrences_across_segments() {
        let flagger = PhraseFlagger::new(vec!["in summary".into()]);
        let lines = flagger.flag(&[
            segment(0.0, "In summary, yes."),
            segment(5.0, "And in summary again."),
        ]);
        assert!(lines.contains(&"  \"in summary\": 2 occurrence(s)".to_string()));
    }

    #[test]
    fn reference_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrases.txt");
        std::fs::write(&path, "Moreover\n\n  As A Matter Of Fact \n").unwrap();
        let flagger = PhraseFlagger::from_file(&path).unwrap();
        assert_eq!(flagger.phrases(), &["moreover".to_string(), "as a matter of fact".to_string()]);
    }

    #[test]
    fn missing_reference_file_is_a_config_error() {
        let err = PhraseFlagger::from_file(Path::new("/nonexistent/phrases.txt")).unwrap_err();
        assert!(matches!(err, OverwatchError::Config(_)));
    }
}
