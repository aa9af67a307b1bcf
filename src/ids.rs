//! Id arithmetic.
//!
//! A static id is what the author wrote. A prefixed id prepends the chain of
//! enclosing component ids, each followed by `$`. An effective id appends the
//! repeat-iteration chain after `.`, positions joined with `-`:
//!
//! ```text
//! static     ctl
//! prefixed   outer$cmp$ctl
//! effective  outer$cmp$ctl.2-5
//! ```

use std::collections::HashSet;

pub const COMPONENT_SEPARATOR: char = '$';
pub const REPEAT_SEPARATOR: char = '.';
pub const REPEAT_INDEX_SEPARATOR: char = '-';

/// Prefix of the scope introduced by the bound element `scope_id`.
/// The top-level scope (empty id) has an empty prefix.
pub fn full_prefix(scope_id: &str) -> String {
    if scope_id.is_empty() {
        String::new()
    } else {
        format!("{}{}", scope_id, COMPONENT_SEPARATOR)
    }
}

/// `outer$cmp$ctl` -> `outer$cmp$`
pub fn prefix_of(prefixed_id: &str) -> &str {
    match prefixed_id.rfind(COMPONENT_SEPARATOR) {
        Some(i) => &prefixed_id[..=i],
        None => "",
    }
}

/// Drops the trailing separator of a prefix: `outer$cmp$` -> `outer$cmp`.
pub fn scope_id_of_prefix(prefix: &str) -> &str {
    prefix.strip_suffix(COMPONENT_SEPARATOR).unwrap_or(prefix)
}

/// `outer$cmp$ctl.2-5` -> `ctl`
pub fn static_id_of(id: &str) -> &str {
    let prefixed = prefixed_id_of(id);
    match prefixed.rfind(COMPONENT_SEPARATOR) {
        Some(i) => &prefixed[i + 1..],
        None => prefixed,
    }
}

/// `outer$cmp$ctl.2-5` -> `outer$cmp$ctl`
pub fn prefixed_id_of(effective_id: &str) -> &str {
    effective_id
        .split_once(REPEAT_SEPARATOR)
        .map(|(p, _)| p)
        .unwrap_or(effective_id)
}

/// `outer$cmp$ctl.2-5` -> `2-5`, empty outside repeats.
pub fn suffix_of(effective_id: &str) -> &str {
    effective_id
        .split_once(REPEAT_SEPARATOR)
        .map(|(_, s)| s)
        .unwrap_or("")
}

pub fn effective_id(prefixed_id: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        prefixed_id.to_string()
    } else {
        format!("{}{}{}", prefixed_id, REPEAT_SEPARATOR, suffix)
    }
}

/// Replaces the leading iteration chain `old_suffix` of `effective_id` with
/// `new_suffix`, keeping any deeper positions. Ids whose chain does not start
/// with `old_suffix` are returned unchanged.
pub fn replace_suffix(effective_id: &str, old_suffix: &str, new_suffix: &str) -> String {
    let prefixed = prefixed_id_of(effective_id);
    let suffix = suffix_of(effective_id);

    let rest = if suffix == old_suffix {
        Some("")
    } else if old_suffix.is_empty() {
        Some(suffix)
    } else {
        suffix
            .strip_prefix(old_suffix)
            .and_then(|r| r.strip_prefix(REPEAT_INDEX_SEPARATOR))
    };

    match rest {
        Some("") => effective_id_from(prefixed, new_suffix, ""),
        Some(rest) => effective_id_from(prefixed, new_suffix, rest),
        None => effective_id.to_string(),
    }
}

fn effective_id_from(prefixed: &str, lead: &str, rest: &str) -> String {
    let suffix = match (lead.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => lead.to_string(),
        (false, false) => format!("{}{}{}", lead, REPEAT_INDEX_SEPARATOR, rest),
    };
    effective_id(prefixed, &suffix)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ID GENERATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out `xf-N` ids, skipping every id reserved so far.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    used: HashSet<String>,
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator {
            used: HashSet::new(),
            next: 1,
        }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, id: &str) {
        self.used.insert(id.to_string());
    }

    pub fn is_used(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    pub fn next_id(&mut self) -> String {
        loop {
            let candidate = format!("xf-{}", self.next);
            self.next += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
