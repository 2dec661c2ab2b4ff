use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

/// Process-wide configuration, built once at startup and threaded to the
/// oracle boundary. Never read from ambient globals after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub oracle: OracleConfig,
    pub engine: EngineConfig,
    pub fewshot: FewShotConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            oracle: OracleConfig::from_env(),
            engine: EngineConfig::from_env(),
            fewshot: FewShotConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  oracle:  provider={}, configured={}, concurrency={}, retries={}",
            self.oracle.provider,
            self.oracle.is_configured(),
            self.oracle.max_concurrency,
            self.oracle.max_retries,
        );
        tracing::info!(
            "  engine:  workers={}, max_iterations={}, votes={}/{}, min_similarity={}",
            self.engine.worker_concurrency,
            self.engine.max_repair_iterations,
            self.engine.diagnosis_votes,
            self.engine.diagnosis_max_attempts,
            self.engine.min_similarity,
        );
        tracing::info!(
            "  fewshot: path={}, borrow_limit={}",
            self.fewshot
                .path
                .as_ref()
                .map_or_else(|| "(builtin)".to_string(), |p| p.display().to_string()),
            self.fewshot.borrow_limit,
        );
    }
}

// ── Oracle (generation backend) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// "openai", "anthropic", "ollama", or "auto" (inferred from the model name).
    pub provider: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout for provider HTTP calls.
    pub timeout_secs: u64,
    /// Transient-failure retries per oracle call (on top of the first attempt).
    pub max_retries: u32,
    /// Global in-flight cap shared by every component across all cases.
    pub max_concurrency: usize,
}

impl OracleConfig {
    fn from_env() -> Self {
        Self {
            provider: env_or("TEMPLAR_PROVIDER", "ollama"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o"),
            openai_base_url: env_opt("OPENAI_BASE_URL"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            anthropic_model: env_or("ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "llama3.2"),
            temperature: env_parse("TEMPLAR_TEMPERATURE", 0.1),
            max_tokens: env_parse("TEMPLAR_MAX_TOKENS", 4096),
            timeout_secs: env_parse("TEMPLAR_ORACLE_TIMEOUT_SECS", 120),
            max_retries: env_parse("TEMPLAR_ORACLE_MAX_RETRIES", 3),
            max_concurrency: env_parse("TEMPLAR_ORACLE_CONCURRENCY", 8),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.openai_api_key.is_some(),
            "anthropic" | "claude" => self.anthropic_api_key.is_some(),
            "ollama" => true,
            "auto" => self.openai_api_key.is_some() || self.anthropic_api_key.is_some(),
            _ => false,
        }
    }
}

// ── Engine (orchestration policy) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Diagnosing → Repairing → ReVerifying loops allowed per case.
    pub max_repair_iterations: u32,
    /// Independent diagnostic calls that must agree before committing.
    pub diagnosis_votes: u32,
    /// Total diagnostic samples before falling back to `unresolved`.
    pub diagnosis_max_attempts: u32,
    /// Cases processed in parallel.
    pub worker_concurrency: usize,
    /// 1.0 = strict exact/whitespace matching. Anything lower is an explicit
    /// opt-in to a fuzzy tier; parameter values always compare exactly.
    pub min_similarity: f64,
    /// Cap on corpus lines fed into repair context (front + middle + back).
    pub corpus_sample_limit: usize,
    /// Demonstration-augmented retries allowed per case.
    pub max_demo_retries: u32,
}

impl EngineConfig {
    fn from_env() -> Self {
        Self {
            max_repair_iterations: env_parse("TEMPLAR_MAX_ITERATIONS", 3),
            diagnosis_votes: env_parse("TEMPLAR_DIAGNOSIS_VOTES", 2),
            diagnosis_max_attempts: env_parse("TEMPLAR_DIAGNOSIS_MAX_ATTEMPTS", 5),
            worker_concurrency: env_parse("TEMPLAR_WORKERS", 4),
            min_similarity: env_parse("TEMPLAR_MIN_SIMILARITY", 1.0),
            corpus_sample_limit: env_parse("TEMPLAR_CORPUS_SAMPLE_LIMIT", 50),
            max_demo_retries: env_parse("TEMPLAR_DEMO_RETRIES", 2),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_repair_iterations: 3,
            diagnosis_votes: 2,
            diagnosis_max_attempts: 5,
            worker_concurrency: 4,
            min_similarity: 1.0,
            corpus_sample_limit: 50,
            max_demo_retries: 2,
        }
    }
}

// ── Few-shot demonstrations ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotConfig {
    /// JSON file of demonstrations keyed by system name.
    pub path: Option<PathBuf>,
    /// How many foreign systems to borrow from when a system has no
    /// demonstrations of its own.
    pub borrow_limit: usize,
}

impl FewShotConfig {
    fn from_env() -> Self {
        Self {
            path: env_opt("TEMPLAR_FEW_SHOT_PATH").map(PathBuf::from),
            borrow_limit: env_parse("TEMPLAR_FEW_SHOT_BORROW", 3),
        }
    }
}

impl Default for FewShotConfig {
    fn default() -> Self {
        Self { path: None, borrow_limit: 3 }
    }
}
