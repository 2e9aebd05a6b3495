//! Small string helpers shared by the context compiler, router and reviewers.

/// Closes a section of agent activity appended to a task description.
pub const AGENT_ACTIVITY_END: &str = "<!-- /agent-activity -->";

pub const AUDITOR_BLOCK_START: &str = "<!-- auditor-verdict:start -->";
pub const AUDITOR_BLOCK_END: &str = "<!-- auditor-verdict:end -->";

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`truncate_chars`] but appends `...` when something was cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `"Billing API"` -> `"billing-api"`.
pub fn to_kebab_case(name: &str) -> String {
    split_words(name).join("-")
}

/// `"Billing API"` -> `"billing_api"`.
pub fn to_snake_case(name: &str) -> String {
    split_words(name).join("_")
}

/// Remove every `start ... end` block (markers included) from `text`.
pub fn strip_delimited_block(text: &str, start: &str, end: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(begin) = rest.find(start) {
        out.push_str(&rest[..begin]);
        match rest[begin..].find(end) {
            Some(close) => rest = &rest[begin + close + end.len()..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace the first `start ... end` block with `block` (which should carry
/// its own markers), dropping any further copies. Appends when absent.
pub fn replace_delimited_block(text: &str, start: &str, end: &str, block: &str) -> String {
    match text.find(start) {
        Some(begin) if text[begin..].contains(end) => {
            let head = &text[..begin];
            let close = begin + text[begin..].find(end).unwrap_or(0) + end.len();
            let tail = strip_delimited_block(&text[close..], start, end);
            format!("{head}{block}{tail}")
        }
        _ => {
            let base = strip_delimited_block(text, start, end);
            let base = base.trim_end();
            if base.is_empty() {
                block.to_string()
            } else {
                format!("{base}\n\n{block}")
            }
        }
    }
}

/// Prepare a task description for inclusion in agent context.
///
/// Keeps only what follows the last agent-activity section, drops an
/// auditor verdict block, and truncates to `max_chars`.
pub fn clean_description(description: &str, max_chars: usize) -> String {
    let after_activity = match description.rfind(AGENT_ACTIVITY_END) {
        Some(idx) => &description[idx + AGENT_ACTIVITY_END.len()..],
        None => description,
    };
    let stripped = strip_delimited_block(after_activity, AUDITOR_BLOCK_START, AUDITOR_BLOCK_END);
    truncate_chars(stripped.trim(), max_chars).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }

    #[test]
    fn case_variants() {
        assert_eq!(to_kebab_case("Billing API"), "billing-api");
        assert_eq!(to_snake_case("Billing API"), "billing_api");
        assert_eq!(to_kebab_case("billingService"), "billing-service");
        assert_eq!(to_snake_case("web_app v2"), "web_app_v2");
    }

    #[test]
    fn clean_description_keeps_text_after_last_activity() {
        let desc = format!(
            "old ask\n<!-- agent-activity -->run 1{AGENT_ACTIVITY_END}\nmiddle\n<!-- agent-activity -->run 2{AGENT_ACTIVITY_END}\nlatest ask"
        );
        assert_eq!(clean_description(&desc, 100), "latest ask");
    }

    #[test]
    fn clean_description_truncates_and_strips_verdict() {
        let desc = format!("do the thing\n{AUDITOR_BLOCK_START}\nPASS\n{AUDITOR_BLOCK_END}\n");
        assert_eq!(clean_description(&desc, 100), "do the thing");
        assert_eq!(clean_description("abcdef", 4), "abcd");
    }

    #[test]
    fn replace_block_never_duplicates() {
        let block = format!("{AUDITOR_BLOCK_START}\nv1\n{AUDITOR_BLOCK_END}");
        let once = replace_delimited_block("body", AUDITOR_BLOCK_START, AUDITOR_BLOCK_END, &block);
        assert_eq!(once, format!("body\n\n{block}"));

        let block2 = format!("{AUDITOR_BLOCK_START}\nv2\n{AUDITOR_BLOCK_END}");
        let twice = replace_delimited_block(&once, AUDITOR_BLOCK_START, AUDITOR_BLOCK_END, &block2);
        assert_eq!(twice.matches(AUDITOR_BLOCK_START).count(), 1);
        assert!(twice.contains("v2"));
        assert!(!twice.contains("v1"));
        assert!(twice.starts_with("body"));
    }
}
