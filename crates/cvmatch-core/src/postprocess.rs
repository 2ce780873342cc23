/// Strip markdown emphasis, collapse runs of spaces, trim.
pub fn clean_generated_text(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| *c != '*').collect();
    let mut out = String::with_capacity(stripped.len());
    let mut prev_space = false;
    for c in stripped.chars() {
        if c == ' ' {
            if !prev_space { out.push(c); }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

pub fn format_score(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

/// Per-candidate sections of a generated text, keyed by 1-based rank.
///
/// Recognises lines starting with `Candidate N:` (optionally after `#` or `-`);
/// everything up to the next such header or `Final Comparison Summary:` belongs to N.
pub fn split_candidate_sections(text: &str) -> Vec<(usize, String)> {
    let mut sections: Vec<(usize, Vec<&str>)> = Vec::new();
    let mut current: Option<usize> = None;
    for line in text.lines() {
        let trimmed = line.trim_start_matches(|c: char| c == '#' || c == '-' || c.is_whitespace());
        if let Some(rank) = candidate_header(trimmed) {
            let rest = trimmed.split_once(':').map(|(_, r)| r.trim()).unwrap_or_default();
            sections.push((rank, if rest.is_empty() { vec![] } else { vec![rest] }));
            current = Some(sections.len() - 1);
            continue;
        }
        if trimmed.starts_with("Final Comparison Summary") {
            current = None;
            continue;
        }
        if let Some(idx) = current {
            sections[idx].1.push(line);
        }
    }
    sections
        .into_iter()
        .map(|(rank, lines)| (rank, lines.join("\n").trim().to_string()))
        .filter(|(_, body)| !body.is_empty())
        .collect()
}

fn candidate_header(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("Candidate ")?;
    let (num, _) = rest.split_once(':')?;
    num.trim().parse().ok()
}
