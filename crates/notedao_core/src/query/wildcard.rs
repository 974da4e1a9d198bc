//! `%` wildcard helpers for "contains" style LIKE matching.

pub const SQL_WILDCARD: char = '%';

/// Wraps `text` in `%...%` unless it is blank or already starts or ends
/// with a wildcard.
pub fn add_sql_percent_wildcards(text: &str) -> String {
    if text.trim().is_empty()
        || text.starts_with(SQL_WILDCARD)
        || text.ends_with(SQL_WILDCARD)
    {
        return text.to_string();
    }
    format!("{SQL_WILDCARD}{text}{SQL_WILDCARD}")
}

/// Strips one leading and one trailing `%` when both are present.
pub fn remove_sql_percent_wildcards(text: &str) -> String {
    if text.trim().is_empty()
        || !text.starts_with(SQL_WILDCARD)
        || !text.ends_with(SQL_WILDCARD)
    {
        return text.to_string();
    }
    if text.len() == 1 {
        return String::new();
    }
    text[1..text.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::{add_sql_percent_wildcards, remove_sql_percent_wildcards};

    #[test]
    fn add_wraps_plain_text_once() {
        assert_eq!(add_sql_percent_wildcards("draft"), "%draft%");
        assert_eq!(add_sql_percent_wildcards("%draft%"), "%draft%");
        assert_eq!(
            add_sql_percent_wildcards(&add_sql_percent_wildcards("draft")),
            "%draft%"
        );
    }

    #[test]
    fn add_leaves_half_wrapped_text_alone() {
        assert_eq!(add_sql_percent_wildcards("%draft"), "%draft");
        assert_eq!(add_sql_percent_wildcards("draft%"), "draft%");
    }

    #[test]
    fn remove_requires_both_ends() {
        assert_eq!(remove_sql_percent_wildcards("%draft%"), "draft");
        assert_eq!(remove_sql_percent_wildcards("%draft"), "%draft");
        assert_eq!(remove_sql_percent_wildcards("%"), "");
        assert_eq!(remove_sql_percent_wildcards("%%"), "");
    }

    #[test]
    fn blank_input_passes_through() {
        for blank in ["", "   "] {
            assert_eq!(add_sql_percent_wildcards(blank), blank);
            assert_eq!(remove_sql_percent_wildcards(blank), blank);
        }
    }

    #[test]
    fn remove_undoes_add() {
        for text in ["a", "two words", "ünïcode"] {
            assert_eq!(
                remove_sql_percent_wildcards(&add_sql_percent_wildcards(text)),
                text
            );
        }
    }
}
