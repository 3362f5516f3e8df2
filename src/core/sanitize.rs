// src/core/sanitize.rs

/// Collapse runs of whitespace to one space and trim both ends.
pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space { out.push(' '); prev_space = true; }
        } else { out.push(ch); prev_space = false; }
    }
    out.trim().to_string()
}

/// Lookup key for names: whitespace-normalized and case-folded.
pub fn name_key(s: &str) -> String {
    normalize_ws(s).to_lowercase()
}

pub fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace().next()
}

pub fn last_token(s: &str) -> Option<&str> {
    s.split_whitespace().next_back()
}

/// "Calculus 3A - S9723 (2025S-MATH-3A)" → "Calculus 3A".
/// Everything up to the first " - " separator; the whole name if there is none.
pub fn course_title(raw: &str) -> String {
    let head = raw.split(" - ").next().unwrap_or(raw);
    normalize_ws(head)
}

/// Keep only chars that are safe in a file stem; used for per-student feed files.
pub fn file_stem_for(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_us = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() { out.push(ch); last_us = false; }
        else if ch.is_whitespace() { if !last_us { out.push('_'); last_us = true; } }
        else if ch=='-' || ch=='_' || ch=='.' { if !(last_us && ch=='_') { out.push(ch); } last_us = ch=='_'; }
    }
    out.trim_matches('_').to_string()
}
