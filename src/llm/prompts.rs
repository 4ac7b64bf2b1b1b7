//! Prompt template registry.
//!
//! Templates use literal `{placeholder}` substitution with no escaping; the
//! caller is responsible for sanitizing interpolated content.

/// Prompt for extracting text from a note image.
pub const OCR_PROMPT: &str = r#"You are transcribing a handwritten or printed study note. Extract ALL text from the image exactly as written, preserving line breaks and formulas.

Rules:
1. Transcribe faithfully - do NOT correct spelling or grammar here
2. Preserve mathematical notation as plain text (e.g. 3x10^8 m/s)
3. Keep the original language of the note (Chinese, English, or mixed)
4. Return ONLY the transcribed text, no commentary or formatting fences"#;

/// Prompt for correcting OCR output.
pub const CORRECTION_PROMPT: &str = r#"You are cleaning up the raw OCR transcription of a study note. Fix recognition errors, broken words, and obvious misspellings WITHOUT changing the meaning or adding content.

Rules:
1. Fix character-level OCR mistakes (e.g. "0" vs "O", split words)
2. Restore punctuation where it is clearly missing
3. Keep the original language and all facts exactly as written
4. Return ONLY the corrected text, nothing else

Raw transcription:
{content}"#;

/// Prompt for summarizing a single note.
pub const SINGLE_NOTE_SUMMARY_PROMPT: &str = r#"You are summarizing a study note into a structured knowledge artifact. Read the whole note and produce a concise, well-organized markdown summary.

Note Title: {title}

Note Content:
{content}

Respond with ONLY a JSON object, no fences, with this shape:
{"title": "short descriptive title", "topic": "subject area", "content_markdown": "markdown summary of the key knowledge", "keywords": ["3-6 keywords"]}"#;

/// Prompt for summarizing one note within a multi-note batch.
pub const PER_NOTE_SUMMARY_PROMPT: &str = r#"You are summarizing one note out of a set that will later be merged. Capture THIS note's key points faithfully and compactly so the merge step loses nothing.

Note Title: {title}

Note Content:
{content}

Respond with ONLY a JSON object, no fences, with this shape:
{"title": "short descriptive title", "topic": "subject area", "content_markdown": "markdown summary of the key knowledge", "keywords": ["3-6 keywords"]}"#;

/// Prompt for merging per-note summaries into one comprehensive summary.
pub const COMPREHENSIVE_SUMMARY_PROMPT: &str = r#"You are merging several note summaries into ONE comprehensive study summary. Cover every distinct point from the inputs, organize related material together, and resolve overlaps without inventing new facts.

Individual summaries, in order:
{content}

Respond with ONLY a JSON object, no fences, with this shape:
{"title": "short descriptive title", "topic": "subject area", "content_markdown": "comprehensive markdown summary", "keywords": ["3-6 keywords"]}"#;

/// Prompt for generating content tags.
pub const TAGS_PROMPT: &str = r#"You are tagging a stored knowledge artifact so it can be found later. Prefer REUSING a name from the existing tag list; mint a new tag only when nothing in the list fits.

Existing tags: {existing_tags}

Summary:
{summary}

Knowledge text:
{content}

Respond with ONLY a JSON object, no fences, with this shape:
{"existing": ["reused tag names"], "new": [{"name": "new tag", "confidence": 0.0-1.0}]}"#;

/// Registry of prompt templates by name.
const REGISTRY: &[(&str, &str)] = &[
    ("ocr", OCR_PROMPT),
    ("correction", CORRECTION_PROMPT),
    ("single_note_summary", SINGLE_NOTE_SUMMARY_PROMPT),
    ("per_note_summary", PER_NOTE_SUMMARY_PROMPT),
    ("comprehensive_summary", COMPREHENSIVE_SUMMARY_PROMPT),
    ("tags", TAGS_PROMPT),
];

/// Look up a prompt template by name.
pub fn prompt(name: &str) -> Option<&'static str> {
    REGISTRY
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, text)| *text)
}

/// Literal `{placeholder}` substitution.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Which summary template to use for a `summarize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTemplate {
    SingleNote,
    PerNote,
    Comprehensive,
}

impl SummaryTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleNote => "single_note_summary",
            Self::PerNote => "per_note_summary",
            Self::Comprehensive => "comprehensive_summary",
        }
    }

    pub fn text(&self) -> &'static str {
        // The registry always contains the three summary templates.
        prompt(self.name()).unwrap_or(SINGLE_NOTE_SUMMARY_PROMPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(prompt("ocr"), Some(OCR_PROMPT));
        assert_eq!(prompt("tags"), Some(TAGS_PROMPT));
        assert_eq!(prompt("nope"), None);
    }

    #[test]
    fn test_render_literal() {
        let out = render("Hello {name}, {name}! {other}", &[("name", "world")]);
        assert_eq!(out, "Hello world, world! {other}");
    }

    #[test]
    fn test_render_no_escaping() {
        // Substitution is literal; braces in values pass through untouched.
        let out = render("{content}", &[("content", "{\"a\": 1}")]);
        assert_eq!(out, "{\"a\": 1}");
    }

    #[test]
    fn test_templates_have_placeholders() {
        assert!(CORRECTION_PROMPT.contains("{content}"));
        assert!(SINGLE_NOTE_SUMMARY_PROMPT.contains("{title}"));
        assert!(TAGS_PROMPT.contains("{existing_tags}"));
        assert_eq!(SummaryTemplate::PerNote.text(), PER_NOTE_SUMMARY_PROMPT);
    }
}
