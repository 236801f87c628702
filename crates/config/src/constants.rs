//! Centralized constants and default values
//!
//! Defaults for every tunable table live here so the settings structs, the
//! shipped `config/default.yaml`, and the tests agree on one source.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Upstream voice agent WebSocket endpoint
    pub const AGENT_DEFAULT: &str = "wss://agent.deepgram.com/v1/agent/converse";

    /// Generation backend HTTP endpoint
    pub const GENERATION_BACKEND_DEFAULT: &str = "http://127.0.0.1:4000";
}

/// Audio handshake defaults
pub mod audio {
    pub const INPUT_ENCODING: &str = "linear16";
    pub const INPUT_SAMPLE_RATE: u32 = 16_000;
    pub const OUTPUT_ENCODING: &str = "linear16";
    pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
}

/// Upstream agent model selection defaults
pub mod models {
    pub const LISTEN_PROVIDER: &str = "deepgram";
    pub const LISTEN_MODEL: &str = "nova-3";
    pub const THINK_PROVIDER: &str = "open_ai";
    pub const THINK_MODEL: &str = "gpt-4o-mini";
    pub const SPEAK_PROVIDER: &str = "deepgram";
    pub const SPEAK_MODEL: &str = "aura-2-thalia-en";
}

/// Generation session timing (seconds)
pub mod generation {
    /// Upper bound on a single backend run
    pub const TIMEOUT_SECS: u64 = 600;

    /// Sessions older than this that never reached `ready` are evicted
    pub const STALE_AFTER_SECS: u64 = 30 * 60;

    /// Interval between staleness sweeps
    pub const SWEEP_INTERVAL_SECS: u64 = 5 * 60;
}

/// Keys every specification must carry
pub const REQUIRED_KEYS: &[&str] = &[
    "name",
    "description",
    "users",
    "goal",
    "features",
    "tech_stack",
    "ui_style",
];

/// Fence prefixes that open a specification block
pub const BLOCK_OPEN_MARKERS: &[&str] = &["```yaml", "```yml"];

/// Fence that closes a specification block
pub const BLOCK_CLOSE_MARKER: &str = "```";

/// Utterances that count as "accept and proceed"
///
/// Matched as case-insensitive substrings. Broad on purpose: a false positive
/// ("yes, but first…") is tolerated, a missed approval is cheap to repeat.
pub const APPROVAL_PHRASES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "sure",
    "correct",
    "perfect",
    "looks good",
    "looks great",
    "sounds good",
    "sounds great",
    "that's right",
    "let's build",
    "build it",
    "let's do it",
    "go ahead",
    "ready",
    "approved",
    "continue",
    "proceed",
    "next step",
    "move on",
];

/// Phrases showing the agent has moved past an unterminated block
pub const TOPIC_SHIFT_PHRASES: &[&str] = &[
    "does this look",
    "does that look",
    "what do you think",
    "let me know",
    "shall we",
    "should we proceed",
    "would you like to",
    "is there anything",
    "ready to build",
    "sound good",
];

/// Spoken back when approval arrives before any specification exists
pub const SPECIFICATION_REQUIRED_MESSAGE: &str =
    "Before we build anything, let's pin down the details. Could you describe what the app should do, who it's for, and how it should look?";

/// System instruction sent in the upstream handshake
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly product designer helping someone describe an app they want built. \
Ask short questions, one at a time, about the app's name, purpose, users, goals, features, technology preferences and visual style. \
When you have enough detail, output the specification as a fenced YAML block starting with ```yaml and ending with ```, \
using exactly these keys: name, description, users, goal, features, tech_stack, ui_style. \
Never read the YAML aloud. After the block, ask whether it looks right and whether they are ready to build.";

/// Greeting the agent speaks first
pub const DEFAULT_GREETING: &str = "Hi! Tell me about the app you'd like to build.";
