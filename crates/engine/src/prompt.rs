//! Prompt builders and reply parsing for every oracle-facing step.

use std::fmt::Write as _;

use templar_core::{LogSample, Template, TemplateCase, Verdict};
use templar_oracle::{Demonstration, Message};

/// Build the standard two-message prompt: system role + user task.
fn messages(system_prompt: &str, user: String) -> Vec<Message> {
    vec![Message::system(system_prompt), Message::user(user)]
}

// ── Extraction ──────────────────────────────────────────────────────

pub fn extraction(
    system: &str,
    raw: &str,
    template: Option<&Template>,
    demos: &[Demonstration],
) -> Vec<Message> {
    let mut examples = String::new();
    for d in demos {
        let _ = write!(
            examples,
            "Input Log: {}\nInput Template: {}\nOutput Description: {}\n\n",
            d.log, d.template, d.description
        );
    }

    let template_line = template
        .map(|t| format!("Log Template: {}\n", t.pattern))
        .unwrap_or_default();

    let user = format!(
        "Convert the log line below into a single-paragraph event statement.\n\
         \n\
         Rules:\n\
         1. Every variable value in the log (IPs, paths, numbers, identifiers) must \
         appear in the statement exactly as written, byte for byte.\n\
         2. Do not invent values that are not present in the log.\n\
         3. Do not explain what {system} or its components are; state what happened.\n\
         4. Use a declarative tone and output one paragraph with no headings.\n\
         \n\
         Reference examples ({system} or similar systems):\n\
         \n\
         {examples}---\n\
         \n\
         System Name: {system}\n\
         Log Content: {raw}\n\
         {template_line}\
         \n\
         Event description:"
    );

    messages(
        "You are an expert system for log interpretation. Output the event description \
         directly, without any title or prefix.",
        user,
    )
}

// ── Reconstruction ──────────────────────────────────────────────────

pub fn reconstruction(pattern: &str, description: &str, demos: &[Demonstration]) -> Vec<Message> {
    let mut examples = String::new();
    if !demos.is_empty() {
        examples.push_str("Reference examples (note the exact spacing):\n\n");
        for (i, d) in demos.iter().enumerate() {
            let _ = write!(
                examples,
                "Example {}:\nTemplate: `{}`\nDescription: {}\nLog: `{}`\n\n",
                i + 1,
                d.template,
                d.description,
                d.log
            );
        }
        examples.push_str("---\n\n");
    }

    let user = format!(
        "{examples}Reconstruct the original log line from the template and description.\n\
         \n\
         Log Template:\n\
         ```text\n\
         {pattern}\n\
         ```\n\
         \n\
         Event Description: {description}\n\
         \n\
         Requirements:\n\
         - Fill each <*> placeholder with the value taken from the description.\n\
         - Keep the template's fixed text exactly as given: do not add or remove \
         spaces, do not normalize unusual spacing, do not change punctuation.\n\
         - Return only the completed log text, with no markdown fences or quotes.\n\
         \n\
         Generated Log:"
    );

    messages(
        "You are a precise log reconstruction engine. Follow the template and \
         description strictly and output only the log text itself.",
        user,
    )
}

// ── Diagnosis ───────────────────────────────────────────────────────

pub fn diagnosis(
    template: &Template,
    failures: &[(LogSample, Verdict)],
    history: &str,
) -> Vec<Message> {
    let mut failure_block = String::new();
    for (sample, verdict) in failures.iter().take(10) {
        let _ = write!(
            failure_block,
            "- line {}: original `{}` | reconstruction `{}` | divergence {:?}\n",
            sample.line_id, sample.raw, verdict.reconstruction, verdict.trace
        );
    }

    let user = format!(
        "A template failed its reconstruction round-trip. Decide why.\n\
         \n\
         Template (system {}): `{}`\n\
         Template description: {}\n\
         \n\
         Failing round-trips:\n\
         {failure_block}\
         {history}\
         \n\
         Pick exactly one cause:\n\
         - missing-structure: a fixed literal present in the raw lines is absent from \
         the template.\n\
         - missing-parameter: a variable value in the raw lines has no <*> slot.\n\
         - over-merged: the template covers two or more distinct event formats at once.\n\
         - syntax-error: the template pattern itself is degenerate or malformed.\n\
         - hallucination-induced: template and description look right; the generator \
         keeps inventing content.\n\
         - unresolved: none of the above can be established from the evidence.\n\
         \n\
         Answer with JSON only:\n\
         ```json\n\
         {{\"cause\": \"<one of the tags above>\", \"confidence\": \"<high|medium|low>\", \
         \"analysis\": \"<step-by-step reasoning>\"}}\n\
         ```",
        template.system, template.pattern, template.description,
    );

    messages(
        "You are a log analysis expert. Determine the root cause of reconstruction \
         failures and always answer in the requested JSON format.",
        user,
    )
}

// ── Template repair ─────────────────────────────────────────────────

pub fn template_repair(
    template: &Template,
    cause: &str,
    rationale: &str,
    failures: &[(LogSample, Verdict)],
    corpus: &[&LogSample],
    history: &str,
) -> Vec<Message> {
    let mut failure_block = String::new();
    for (sample, verdict) in failures.iter().take(10) {
        let _ = write!(
            failure_block,
            "- line {}: original `{}` | reconstruction `{}`\n",
            sample.line_id, sample.raw, verdict.reconstruction
        );
    }

    let mut corpus_block = String::new();
    for sample in corpus {
        let _ = write!(corpus_block, "[line {}] {}\n", sample.line_id, sample.raw);
    }

    let user = format!(
        "The template below was diagnosed as `{cause}`: {rationale}\n\
         \n\
         Current template (system {}): `{}`\n\
         \n\
         Failing round-trips:\n\
         {failure_block}\
         \n\
         Raw lines covered by this template (mixed sample):\n\
         {corpus_block}\
         {history}\
         \n\
         Propose a corrected template. Be conservative: fix only the demonstrated \
         defect (punctuation, a missing literal, a missing <*> slot), keep the rest \
         of the skeleton untouched, and never turn working fixed text into a \
         wildcard just to match more lines.\n\
         \n\
         Answer with JSON only:\n\
         ```json\n\
         {{\"needs_repair\": true, \"new_template\": \"<corrected template>\", \
         \"explanation\": \"<what was wrong and what changed>\", \
         \"confidence\": \"<high|medium|low>\"}}\n\
         ```",
        template.system, template.pattern,
    );

    messages(
        "You are a log template expert. Analyze log patterns, suggest accurate and \
         minimal template corrections, and always answer in the requested JSON format.",
        user,
    )
}

// ── Template split ──────────────────────────────────────────────────

pub fn split(template: &Template, groups: &[Vec<&LogSample>], history: &str) -> Vec<Message> {
    let mut group_block = String::new();
    for (i, group) in groups.iter().enumerate() {
        let _ = write!(group_block, "Group {} ({} lines):\n", i + 1, group.len());
        for sample in group.iter().take(5) {
            let _ = write!(group_block, "  [line {}] {}\n", sample.line_id, sample.raw);
        }
        group_block.push('\n');
    }

    let user = format!(
        "The template below covers more than one event format. The raw lines \
         cluster into the groups shown; emit one template per group.\n\
         \n\
         Current template (system {}): `{}`\n\
         \n\
         {group_block}\
         {history}\
         \n\
         Requirements:\n\
         - Every group gets exactly one template that matches all of its lines.\n\
         - Use <*> only for values that vary within the group.\n\
         - Assign every line id to exactly one template.\n\
         \n\
         Answer with JSON only:\n\
         ```json\n\
         {{\"templates\": [{{\"pattern\": \"<template>\", \"lines\": [\"<line id>\", ...]}}]}}\n\
         ```",
        template.system, template.pattern,
    );

    messages(
        "You are a log template expert. Split over-merged templates cleanly and \
         always answer in the requested JSON format.",
        user,
    )
}

// ── Description refinement ──────────────────────────────────────────

pub fn refine(template: &Template, samples: &[LogSample], history: &str) -> Vec<Message> {
    let mut sample_block = String::new();
    for sample in samples.iter().take(10) {
        let _ = write!(sample_block, "[line {}] {}\n", sample.line_id, sample.raw);
    }

    let user = format!(
        "The description of this template is too vague to support reconstruction. \
         Rewrite it using the matched lines as context. Do not change the template \
         pattern itself.\n\
         \n\
         Template (system {}): `{}`\n\
         Current description: {}\n\
         \n\
         Matched lines:\n\
         {sample_block}\
         {history}\
         \n\
         Output only the new description, one paragraph, no headings.",
        template.system, template.pattern, template.description,
    );

    messages(
        "You are an expert system for log interpretation. Output the improved \
         description directly, without any title or prefix.",
        user,
    )
}

// ── History digest ──────────────────────────────────────────────────

/// Compact per-case history fed back into later prompts so the oracle does
/// not repeat approaches that already failed.
pub fn history_digest(case: &TemplateCase) -> String {
    if case.attempts.is_empty() && case.diagnoses.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nPrevious rounds on this template:\n");
    for (i, d) in case.diagnoses.iter().enumerate() {
        let _ = write!(out, "- diagnosis {}: {} ({})\n", i + 1, d.cause, truncate(&d.rationale, 200));
    }
    for (i, a) in case.attempts.iter().enumerate() {
        let candidates: Vec<&str> = a.candidates.iter().map(|c| c.pattern.as_str()).collect();
        let _ = write!(
            out,
            "- attempt {} via {}: candidates {:?}, {}\n",
            i + 1,
            a.operation,
            candidates,
            if a.accepted { "accepted" } else { "rejected by re-verification" },
        );
    }
    out.push_str("Avoid repeating approaches that were already rejected.\n");
    out
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ── Reply parsing ───────────────────────────────────────────────────

/// Trim a free-text reply, removing a wrapping code fence or quote pair.
pub fn strip_reply(text: &str) -> String {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        // drop an optional language tag on the fence line
        let rest = rest.strip_prefix("text").or_else(|| rest.strip_prefix("json")).unwrap_or(rest);
        t = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if t.len() >= 2 {
        let stripped = t
            .strip_prefix('`')
            .and_then(|s| s.strip_suffix('`'))
            .or_else(|| t.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
        if let Some(s) = stripped {
            t = s;
        }
    }
    t.to_string()
}

/// Parse a structured reply: fenced ```json block first, whole text second,
/// first-brace-to-last-brace as a final salvage.
pub fn parse_json_reply(text: &str) -> Option<serde_json::Value> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            if let Ok(v) = serde_json::from_str(rest[..end].trim()) {
                return Some(v);
            }
        }
    }
    if let Ok(v) = serde_json::from_str(text.trim()) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
