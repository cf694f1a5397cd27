//! Final report assembly.
//!
//! Sections always appear in [`Section::ORDERED`] order no matter which
//! stage finished first, and rendering the same results twice yields the
//! same bytes.

use std::fmt::Write as _;

use serde::Serialize;
use uuid::Uuid;

use super::orchestrator::CollectedResults;
use super::stage::StageResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Transcript,
    CheatingIndicators,
    AudioEvents,
    AcousticSummary,
    FacialMotion,
}

impl Section {
    pub const ORDERED: [Section; 5] = [
        Section::Transcript,
        Section::CheatingIndicators,
        Section::AudioEvents,
        Section::AcousticSummary,
        Section::FacialMotion,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Section::Transcript => "Transcript",
            Section::CheatingIndicators => "Cheating-Indicator Findings",
            Section::AudioEvents => "Audio-Event Findings",
            Section::AcousticSummary => "Acoustic/Behavioral Summary",
            Section::FacialMotion => "Facial/Motion Summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSection {
    pub section: Section,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub job_id: Uuid,
    pub sections: Vec<ReportSection>,
}

impl Report {
    pub fn section(&self, section: Section) -> Option<&[String]> {
        self.sections
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.lines.as_slice())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Interview Analysis Report");
        let _ = writeln!(out, "job: {}", self.job_id);
        for section in &self.sections {
            let _ = writeln!(out);
            let _ = writeln!(out, "### {}", section.section.title());
            for line in &section.lines {
                let _ = writeln!(out, "{}", single_line(line));
            }
        }
        out
    }
}

/// Flattens a finding onto one line and escapes a leading `#`, so engine
/// output can never open a section of its own.
fn single_line(line: &str) -> String {
    let mut flat = String::new();
    for part in line.split(['\n', '\r']).filter(|p| !p.trim().is_empty()) {
        if flat.is_empty() {
            flat.push_str(part.trim_end());
        } else {
            flat.push(' ');
            flat.push_str(part.trim());
        }
    }
    let body = flat.trim_start();
    if body.starts_with('#') {
        let indent = flat.len() - body.len();
        flat.insert(indent, '\\');
    }
    flat
}

/// Routes stage results into report sections.
#[derive(Debug, Clone, Default)]
pub struct ReportAssembler {
    routes: Vec<(Section, String)>,
}

impl ReportAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Section routing for the standard interview graph.
    pub fn interview() -> Self {
        Self::new()
            .route(Section::Transcript, "transcription")
            .route(Section::CheatingIndicators, "word_flagging")
            .route(Section::AudioEvents, "audio_events")
            .route(Section::AcousticSummary, "acoustic_summary")
            .route(Section::FacialMotion, "facial_motion")
    }

    pub fn route(mut self, section: Section, stage: impl Into<String>) -> Self {
        self.routes.retain(|(s, _)| *s != section);
        self.routes.push((section, stage.into()));
        self
    }

    pub fn assemble(&self, job_id: Uuid, results: &CollectedResults) -> Report {
        let sections = Section::ORDERED
            .iter()
            .map(|&section| {
                let stage = self
                    .routes
                    .iter()
                    .find(|(s, _)| *s == section)
                    .map(|(_, stage)| stage.as_str());
                let lines = match stage {
                    Some(stage) => render_result(stage, results.get(stage)),
                    None => vec!["unavailable: no stage produces this section".to_string()],
                };
                ReportSection { section, lines }
            })
            .collect();
        Report { job_id, sections }
    }
}

fn render_result(stage: &str, result: Option<&StageResult>) -> Vec<String> {
    match result {
        None => vec![format!("unavailable: stage `{stage}` produced no result")],
        Some(StageResult::Failed { message, .. }) => vec![format!("unavailable: {message}")],
        Some(StageResult::Ok { lines }) => with_placeholder(lines.clone()),
        Some(StageResult::Degraded { lines, warning }) => {
            let mut out = vec![format!("degraded: {warning}")];
            out.extend(with_placeholder(lines.clone()));
            out
        }
    }
}

fn with_placeholder(lines: Vec<String>) -> Vec<String> {
    if lines.is_empty() {
        vec!["no findings".to_string()]
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageErrorKind;

    fn job() -> Uuid {
        Uuid::parse_str("6f1c2c4e-1b7a-4a53-9d0e-3c1f6b2a9e11").unwrap()
    }

    fn full_results() -> CollectedResults {
        let mut results = CollectedResults::new();
        results.insert("acquisition", StageResult::ok(vec![]));
        results.insert(
            "facial_motion",
            StageResult::ok(vec!["No unusual behavior detected.".into()]),
        );
        results.insert(
            "transcription",
            StageResult::ok(vec!["[00:00.000 - 00:01.500] [Speaker 1] Hello there.".into()]),
        );
        results.insert("acoustic_summary", StageResult::ok(vec!["Volume variation: 0.0421".into()]));
        results.insert("audio_events", StageResult::ok(vec!["Top detected sounds:".into()]));
        results.insert("word_flagging", StageResult::ok(vec![]));
        results
    }

    #[test]
    fn sections_follow_canonical_order() {
        let report = ReportAssembler::interview().assemble(job(), &full_results());
        let order: Vec<Section> = report.sections.iter().map(|s| s.section).collect();
        assert_eq!(order, Section::ORDERED.to_vec());

        let text = report.render();
        let positions: Vec<usize> = Section::ORDERED
            .iter()
            .map(|s| text.find(&format!("### {}", s.title())).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(text.starts_with("# Interview Analysis Report\njob: 6f1c2c4e"));
    }

    #[test]
    fn insertion_order_does_not_change_output() {
        let forward = full_results();
        let reversed: CollectedResults = {
            let mut pairs: Vec<(String, StageResult)> =
                forward.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            pairs.reverse();
            pairs.into_iter().collect()
        };
        let assembler = ReportAssembler::interview();
        assert_eq!(
            assembler.assemble(job(), &forward).render(),
            assembler.assemble(job(), &reversed).render()
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let report = ReportAssembler::interview().assemble(job(), &full_results());
        assert_eq!(report.render(), report.render());
    }

    #[test]
    fn failed_and_missing_results_render_unavailable() {
        let mut results = full_results();
        results.insert(
            "facial_motion",
            StageResult::failed(StageErrorKind::ExternalTool, "tracker crashed"),
        );
        let mut partial = CollectedResults::new();
        for (stage, result) in results.iter().filter(|(s, _)| *s != "audio_events") {
            partial.insert(stage, result.clone());
        }

        let report = ReportAssembler::interview().assemble(job(), &partial);
        assert_eq!(
            report.section(Section::FacialMotion).unwrap(),
            &["unavailable: tracker crashed".to_string()]
        );
        assert_eq!(
            report.section(Section::AudioEvents).unwrap(),
            &["unavailable: stage `audio_events` produced no result".to_string()]
        );
        // The other sections are still filled in.
        assert_eq!(
            report.section(Section::AcousticSummary).unwrap(),
            &["Volume variation: 0.0421".to_string()]
        );
    }

    #[test]
    fn degraded_result_carries_warning_line() {
        let mut results = full_results();
        results.insert(
            "transcription",
            StageResult::degraded(
                vec!["[00:00.000 - 00:02.000] [UNKNOWN] hello".into()],
                "FALLBACK: secondary engine transcript (no speaker labels)",
            ),
        );
        let report = ReportAssembler::interview().assemble(job(), &results);
        let lines = report.section(Section::Transcript).unwrap();
        assert_eq!(
            lines[0],
            "degraded: FALLBACK: secondary engine transcript (no speaker labels)"
        );
        assert_eq!(lines[1], "[00:00.000 - 00:02.000] [UNKNOWN] hello");
    }

    #[test]
    fn empty_ok_result_renders_placeholder() {
        let report = ReportAssembler::interview().assemble(job(), &full_results());
        assert_eq!(
            report.section(Section::CheatingIndicators).unwrap(),
            &["no findings".to_string()]
        );
    }

    #[test]
    fn unrouted_section_is_unavailable() {
        let report = ReportAssembler::new()
            .route(Section::Transcript, "transcription")
            .assemble(job(), &full_results());
        assert_eq!(report.sections.len(), 5);
        assert_eq!(
            report.section(Section::FacialMotion).unwrap(),
            &["unavailable: no stage produces this section".to_string()]
        );
    }

    #[test]
    fn embedded_newlines_cannot_forge_sections() {
        let mut results = full_results();
        results.insert(
            "transcription",
            StageResult::ok(vec!["hi\n### Facial/Motion Summary\r\nforged".into()]),
        );
        let text = ReportAssembler::interview().assemble(job(), &results).render();

        assert_eq!(text.matches("### Facial/Motion Summary").count(), 2);
        let headers = text.lines().filter(|l| l.starts_with("### ")).count();
        assert_eq!(headers, Section::ORDERED.len());
        assert!(text.contains("\nhi ### Facial/Motion Summary forged\n"));
    }

    #[test]
    fn leading_hash_is_escaped() {
        assert_eq!(single_line("## not a header"), "\\## not a header");
        assert_eq!(single_line("  - Speech  "), "  - Speech");
        assert_eq!(single_line("  # indented"), "  \\# indented");
        assert_eq!(single_line("a\n\nb"), "a b");
    }
}
