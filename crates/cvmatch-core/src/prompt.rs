//! Versioned prompt templates.

use crate::config::PromptVersion;

/// Collapse newlines to spaces and trim, keeping each candidate on one line.
pub fn sanitize_candidate(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

/// `Candidate {n}: {text}` blocks in ranked order, separated by a blank line.
pub fn candidate_blocks<S: AsRef<str>>(ranked: &[S]) -> String {
    ranked
        .iter()
        .enumerate()
        .map(|(i, text)| format!("Candidate {}: {}", i + 1, sanitize_candidate(text.as_ref())))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(version: PromptVersion, job_description: &str, candidate_blocks: &str, top_k: usize) -> String {
    match version {
        PromptVersion::V1 => v1(job_description, candidate_blocks, top_k),
        PromptVersion::V2 => v2(job_description, candidate_blocks, top_k),
    }
}

fn v1(jd: &str, cvs: &str, top_k: usize) -> String {
    format!(
        "You are an expert technical recruiter. Here's a job description and {top_k} candidates. Who is the best fit? Why?\n\n\
         Job Description:\n{jd}\n\n\
         {cvs}\n\n\
         Please summarize strengths and weaknesses of each, and name the best candidate."
    )
}

fn v2(jd: &str, cvs: &str, top_k: usize) -> String {
    format!(
        "You are an expert technical recruiter. Evaluate the following {top_k} candidates solely based on their CV content in relation to the job description.\n\n\
         Job Description:\n{jd}\n\n\
         Candidate Profiles:\n{cvs}\n\n\
         Instructions:\n\
         1. For each candidate, provide a 1–2 sentence summary highlighting their technical background, years of experience, and notable technologies.\n\
         2. Think step-by-step to determine if the candidate fits the job description: compare required skills, years of experience, tools used, and relevant projects.\n\
         3. Mention strengths and weaknesses for each candidate.\n\
         4. Conclude with a comparative analysis summarizing which candidates are strong, moderate, or poor fits.\n\n\
         Output Format:\n\
         Candidate X:\n\
         - Summary: ...\n\
         - Strengths: ...\n\
         - Weaknesses: ...\n\n\
         Final Comparison Summary:\n\
         ...\n\n\
         Begin your reasoning now."
    )
}
