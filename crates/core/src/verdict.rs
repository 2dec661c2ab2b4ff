use serde::{Deserialize, Serialize};

/// Which comparison tier a passing reconstruction matched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Whitespace,
}

/// How a failing reconstruction first diverged from the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// The original carries a value the reconstruction has no slot for.
    MissingSlot,
    /// The reconstruction inserted content the original does not have.
    ExtraSlot,
    /// Fixed text differs at this position.
    LiteralMismatch,
    /// The reconstruction ends before the original does.
    Truncation,
}

/// Earliest point of divergence, tokenwise over normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceTrace {
    pub token_index: usize,
    pub kind: DivergenceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
}

/// Outcome of one reconstruction round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub pass: bool,
    pub reconstruction: String,
    /// Token-level similarity against the original, in `[0, 1]`.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<MatchTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<DivergenceTrace>,
    /// Set when verification could not run to completion (extraction loss or
    /// an exhausted oracle); never counts as a pass.
    #[serde(default)]
    pub inconclusive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Verdict {
    /// A verification that could not produce a usable reconstruction.
    pub fn inconclusive(note: &str) -> Self {
        Self {
            pass: false,
            reconstruction: String::new(),
            score: 0.0,
            tier: None,
            trace: None,
            inconclusive: true,
            note: Some(note.to_string()),
        }
    }
}

/// Trim and collapse internal whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compare a reconstruction against the original line.
///
/// Exact match first, whitespace-normalized second; both pass. Anything else
/// fails with the earliest tokenwise divergence recorded. `min_similarity`
/// below 1.0 enables an explicit fuzzy tier, but parameter values must still
/// appear verbatim — fuzzy parameters would erase the anomaly signal.
pub fn compare(original: &str, reconstruction: &str, params: &[String], min_similarity: f64) -> Verdict {
    if original == reconstruction {
        return Verdict {
            pass: true,
            reconstruction: reconstruction.to_string(),
            score: 1.0,
            tier: Some(MatchTier::Exact),
            trace: None,
            inconclusive: false,
            note: None,
        };
    }

    let orig_norm = normalize(original);
    let recon_norm = normalize(reconstruction);
    if orig_norm == recon_norm {
        return Verdict {
            pass: true,
            reconstruction: reconstruction.to_string(),
            score: 1.0,
            tier: Some(MatchTier::Whitespace),
            trace: None,
            inconclusive: false,
            note: None,
        };
    }

    let orig: Vec<&str> = orig_norm.split(' ').filter(|t| !t.is_empty()).collect();
    let recon: Vec<&str> = recon_norm.split(' ').filter(|t| !t.is_empty()).collect();
    let score = token_similarity(&orig, &recon);
    let trace = divergence(&orig, &recon, params, original);

    let fuzzy_pass = min_similarity < 1.0
        && score >= min_similarity
        && params
            .iter()
            .all(|p| p.is_empty() || reconstruction.contains(p.as_str()));

    Verdict {
        pass: fuzzy_pass,
        reconstruction: reconstruction.to_string(),
        score,
        tier: None,
        trace: Some(trace),
        inconclusive: false,
        note: None,
    }
}

/// `2 * LCS / (len_a + len_b)` over tokens.
fn token_similarity(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ta in a {
        for (j, tb) in b.iter().enumerate() {
            row[j + 1] = if ta == tb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    let lcs = prev[b.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

/// Classify the earliest diverging token.
fn divergence(orig: &[&str], recon: &[&str], params: &[String], raw_original: &str) -> DivergenceTrace {
    let mut i = 0usize;
    while i < orig.len() && i < recon.len() && orig[i] == recon[i] {
        i += 1;
    }

    if i == recon.len() {
        // Reconstruction ran out first.
        return DivergenceTrace {
            token_index: i,
            kind: DivergenceKind::Truncation,
            expected: orig.get(i).map(|t| t.to_string()),
            found: None,
        };
    }
    if i == orig.len() {
        return DivergenceTrace {
            token_index: i,
            kind: DivergenceKind::ExtraSlot,
            expected: None,
            found: Some(recon[i].to_string()),
        };
    }

    let expected = orig[i];
    let found = recon[i];

    // A deleted token: the original holds a value the reconstruction skipped.
    let deletion = orig.len() > recon.len() && orig[i + 1..] == recon[i..];
    let carries_param = params.iter().any(|p| {
        !p.is_empty() && (expected == p.as_str() || p.split_whitespace().any(|w| w == expected))
    });
    if deletion || carries_param {
        return DivergenceTrace {
            token_index: i,
            kind: DivergenceKind::MissingSlot,
            expected: Some(expected.to_string()),
            found: Some(found.to_string()),
        };
    }

    // An inserted token the original never contained anywhere.
    let insertion = recon.len() > orig.len() && recon[i + 1..] == orig[i..];
    if insertion && !raw_original.contains(found) {
        return DivergenceTrace {
            token_index: i,
            kind: DivergenceKind::ExtraSlot,
            expected: Some(expected.to_string()),
            found: Some(found.to_string()),
        };
    }

    DivergenceTrace {
        token_index: i,
        kind: DivergenceKind::LiteralMismatch,
        expected: Some(expected.to_string()),
        found: Some(found.to_string()),
    }
}
