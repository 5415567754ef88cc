use regex::Regex;
use std::sync::OnceLock;

/// Clean a recognizer transcript before it becomes a user message.
///
/// Strips non-speech markers the recognizer emits for silence or background
/// sound, then collapses whitespace. Returns an empty string when nothing
/// speakable is left.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .ok()
    });
    let without_markers = match re {
        Some(re) => re.replace_all(trimmed, " "),
        None => trimmed.into(),
    };
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
