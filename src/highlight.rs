use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

pub fn build_highlight_regex(tokens: &[String]) -> Option<Regex> {
    if tokens.is_empty() {
        return None;
    }
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let lowered = token.to_lowercase();
        if seen.insert(lowered) {
            unique.push(token.clone());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .into_iter()
        .map(|token| regex::escape(&token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Wraps every match in square brackets for plain-text output.
pub fn mark_matches(text: &str, regex: Option<&Regex>) -> String {
    match regex {
        Some(regex) => regex.replace_all(text, "[${0}]").into_owned(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_longer_tokens_first() {
        let regex = build_highlight_regex(&["caf".into(), "cafe".into()]).expect("regex");
        let matches: Vec<_> = regex.find_iter("cafeteria").map(|m| m.as_str()).collect();
        assert_eq!(matches, vec!["cafe"]);
    }

    #[test]
    fn marks_matches_case_insensitively() {
        let regex = build_highlight_regex(&["bread".into()]);
        assert_eq!(
            mark_matches("Fresh Bread and bread", regex.as_ref()),
            "Fresh [Bread] and [bread]"
        );
        assert_eq!(mark_matches("untouched", None), "untouched");
    }

    #[test]
    fn escapes_regex_metacharacters() {
        let regex = build_highlight_regex(&["a.b".into()]).expect("regex");
        assert!(!regex.is_match("axb"));
        assert!(regex.is_match("A.B"));
    }
}
