//! Text helpers shared by the library module.

/// Case-insensitive comparison key: trimmed and lowercased.
pub fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Capitalize the first letter of every whitespace-separated word and lowercase the rest.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Strip the first matching lead-in phrase (already folded) from `text`.
pub fn strip_lead_in<'a>(text: &'a str, lead_ins: &[&str]) -> &'a str {
    for lead_in in lead_ins {
        if let Some(rest) = text.strip_prefix(lead_in) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    text
}

/// Join quoted titles for speech: `'A', 'B', 'C'`.
pub fn quoted_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items
        .into_iter()
        .map(|item| format!("'{item}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// "1 book", "3 books".
pub fn count(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("1 {singular}")
    } else {
        format!("{n} {plural}")
    }
}
