//! CSS selector to path expression translation for `xbl:content/@includes`.
//!
//! Only the subset used by binding authors is understood: element names
//! (with `prefix|local`), the descendant combinator and `>`.

/// Translates a selector list into a path expression relative to the bound
/// element.
///
/// `foo|a foo|b, bar|a > bar|b` ->
/// `descendant-or-self::foo:a//foo:b|descendant-or-self::bar:a/bar:b`
pub fn css_to_path(selector: &str) -> String {
    selector
        .split(',')
        .map(|alternative| translate_alternative(alternative.trim()))
        .filter(|path| !path.is_empty())
        .collect::<Vec<_>>()
        .join("|")
}

fn translate_alternative(alternative: &str) -> String {
    let mut path = String::new();
    let mut previous: Option<&str> = None;

    for (index, token) in alternative.split_whitespace().enumerate() {
        if index == 0 {
            if token == ">" {
                path.push_str("./");
            } else {
                path.push_str("descendant-or-self::");
                path.push_str(&token.replace('|', ":"));
            }
        } else if token == ">" {
            path.push('/');
        } else {
            if previous != Some(">") {
                path.push_str("//");
            }
            path.push_str(&token.replace('|', ":"));
        }
        previous = Some(token);
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendant_and_child_combinators() {
        assert_eq!(
            css_to_path("foo|a foo|b, bar|a > bar|b"),
            "descendant-or-self::foo:a//foo:b|descendant-or-self::bar:a/bar:b"
        );
    }

    #[test]
    fn test_leading_child_combinator() {
        assert_eq!(css_to_path("> xf|label"), "./xf:label");
        assert_eq!(css_to_path("> a > b"), "./a/b");
    }

    #[test]
    fn test_single_name() {
        assert_eq!(css_to_path("xf|item"), "descendant-or-self::xf:item");
        assert_eq!(css_to_path("  "), "");
    }
}
