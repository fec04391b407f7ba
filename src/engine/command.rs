//! Bang-command normalization.
//!
//! Commands are case-insensitive, whitespace-tolerant, and a handful of
//! multi-word families (the coaching commands) accept spaced, hyphenated and
//! collapsed spellings. Normalization canonicalizes those; everything else
//! passes through untouched for the model to answer from its policy text.

/// Control tokens recognized mid-roleplay. These are bare words, not
/// bang-commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    Continue,
    End,
    Restart,
}

impl ControlToken {
    pub fn parse(normalized: &str) -> Option<Self> {
        match normalized {
            "continue" => Some(ControlToken::Continue),
            "end" => Some(ControlToken::End),
            "restart" => Some(ControlToken::Restart),
            _ => None,
        }
    }
}

/// Alias spellings that resolve to one canonical command.
const ALIASES: &[(&str, &str)] = &[
    ("!coachingtips", "!coaching-tips"),
    ("!coaching tips", "!coaching-tips"),
    ("!coachingroleplay", "!coaching-roleplay"),
    ("!coaching roleplay", "!coaching-roleplay"),
    ("!commands", "!help"),
];

/// The full command surface, canonical spellings only. Used for the
/// missing-bang correction; the core itself only acts on control tokens and
/// scenario triggers, the rest is pass-through.
const KNOWN_COMMANDS: &[&str] = &[
    "!scripts",
    "!trust",
    "!tonality",
    "!firstimpression",
    "!pvf",
    "!objection",
    "!roleplay",
    "!dailylog",
    "!earn",
    "!checkpoints",
    "!coaching",
    "!coaching-tips",
    "!coaching-roleplay",
    "!help",
];

/// Canonicalize one line of input: trim, lowercase, hyphenate the coaching
/// family, resolve aliases. Unmapped text passes through unchanged (modulo
/// trim/lowercase) for downstream free-text handling.
pub fn normalize_command(text: &str) -> String {
    let mut t = text.trim().to_lowercase();

    for (alias, canonical) in ALIASES {
        if t == *alias {
            return (*canonical).to_string();
        }
    }

    // "!coaching tips on tonality" -> "!coaching-tips-on-tonality"
    if let Some(rest) = t.strip_prefix("!coaching ") {
        t = format!("!coaching-{}", rest.replace(' ', "-"));
    }

    t
}

/// Detect a known command typed without its leading `!`. Returns the
/// canonical bang form so the response policy can emit a one-line correction.
pub fn known_command_missing_bang(normalized: &str) -> Option<&'static str> {
    if normalized.starts_with('!') || normalized.is_empty() {
        return None;
    }
    let banged = format!("!{}", normalized.replace(' ', "-"));
    if let Some(cmd) = KNOWN_COMMANDS.iter().find(|cmd| **cmd == banged) {
        return Some(*cmd);
    }

    // "roleplay price" still points at !roleplay. Only the subtype families
    // get this treatment, and only as a two-word line, so ordinary prose
    // starting with a command word ("trust me on this") stays free text.
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.len() == 2 {
        match words[0] {
            "objection" => return Some("!objection"),
            "roleplay" => return Some("!roleplay"),
            "coaching" => return Some("!coaching"),
            _ => {}
        }
    }
    None
}
