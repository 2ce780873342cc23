//! Minimal server-sent-events framing.
//!
//! Network chunks may split lines anywhere; `SseBuffer` keeps the unfinished tail
//! and hands back the `data:` payloads of completed lines.

#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self { Self::default() }

    /// Appends `bytes` and returns every `data:` payload whose line is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) { out.push(data); }
        }
        out
    }

    /// Payload of a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data).to_string())
}
