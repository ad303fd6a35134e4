/// Extract the spoken text from SRT subtitle content.
///
/// Drops cue numbers, timestamp lines and blank separators, keeping the
/// dialogue lines in order. Speaker labels produced by diarization are
/// kept, which reads better in summaries.
pub fn extract_text(srt: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in srt.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.contains("-->") {
            continue;
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        lines.push(trimmed);
    }
    lines.join("\n")
}
