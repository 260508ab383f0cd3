//! Merchant token normalization
//!
//! Turns a noisy bank description into the stable key used by the learned
//! pattern store and the rule table. The function is total: every input maps
//! to a non-empty token, falling back to [`UNKNOWN_TOKEN`].

/// Token used when nothing meaningful survives normalization
pub const UNKNOWN_TOKEN: &str = "_unknown_";

/// Maximum length of a merchant token
pub const MAX_TOKEN_LEN: usize = 40;

/// Maximum length of the cleaned description handed to the AI backend
const MAX_CLEAN_LEN: usize = 200;

/// Processor and card-network words that say nothing about the merchant
const NOISE_WORDS: &[&str] = &[
    "pos",
    "debit",
    "credit",
    "purchase",
    "card",
    "ach",
    "ref",
    "txn",
    "www",
    "com",
    "sq",
    "tst",
    "recurring",
    "payment",
    "checkcard",
];

/// Normalize a raw transaction description into a merchant token
///
/// `normalize_merchant(normalize_merchant(x)) == normalize_merchant(x)` for every `x`.
pub fn normalize_merchant(raw: &str) -> String {
    if raw.trim() == UNKNOWN_TOKEN {
        return UNKNOWN_TOKEN.to_string();
    }

    let mut token = String::with_capacity(MAX_TOKEN_LEN);
    for word in split_words(raw).iter().filter(|w| !is_noise_token(w)) {
        if token.is_empty() {
            if word.len() > MAX_TOKEN_LEN {
                token.push_str(&word[..MAX_TOKEN_LEN]);
                break;
            }
            token.push_str(word);
        } else {
            // Whole words only, so the prefix stays stable as descriptions grow
            if token.len() + 1 + word.len() > MAX_TOKEN_LEN {
                break;
            }
            token.push(' ');
            token.push_str(word);
        }
    }

    if token.is_empty() {
        UNKNOWN_TOKEN.to_string()
    } else {
        token
    }
}

/// Lightly clean a description for the AI backend: collapse whitespace, drop
/// control characters, cap the length. Case and digits are kept.
pub fn clean_description(raw: &str) -> String {
    let collapsed = raw
        .split_whitespace()
        .map(|w| w.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() > MAX_CLEAN_LEN {
        collapsed.chars().take(MAX_CLEAN_LEN).collect()
    } else {
        collapsed
    }
}

/// Split into lowercase ASCII words. Digits and apostrophes vanish without
/// breaking a word ("mcdonald's" -> "mcdonalds"), everything else breaks.
fn split_words(raw: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for c in raw.chars() {
        if c.is_ascii_alphabetic() {
            current.push(c.to_ascii_lowercase());
        } else if c.is_ascii_digit() || c == '\'' {
            continue;
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}

fn is_noise_token(word: &str) -> bool {
    if word.len() <= 1 {
        return true;
    }
    // Card masks like "xxxx" (what is left of "XXXX1234")
    if word.len() <= 16 && word.bytes().all(|b| b == b'x') {
        return true;
    }
    NOISE_WORDS.contains(&word)
}
