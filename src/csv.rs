// src/csv.rs
use std::io::{self, Write};
use std::mem::take;

pub const SEP: char = ',';

/* ---------------- Parsing ---------------- */

/// Minimal CSV parser (quotes + CRLF tolerant). std-only.
/// Blank lines are skipped; a trailing unterminated quote keeps what it has.
pub fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = s!();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next(); // double-quote escape
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            c if c == sep && !in_quotes => {
                // move the field without cloning
                row.push(take(&mut field));
            }
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) { chars.next(); }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    // Flush any trailing field/row even if quotes were unterminated.
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// Split the first row off as the header row. Files in this crate always carry one.
pub fn split_header(mut rows: Vec<Vec<String>>) -> (Option<Vec<String>>, Vec<Vec<String>>) {
    if rows.is_empty() { return (None, rows); }
    let header = rows.remove(0)
        .into_iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    (Some(header), rows)
}

/// Header name → column index, for reading files whose column order may drift.
pub struct HeaderIndex<'a> {
    headers: &'a [String],
}

impl<'a> HeaderIndex<'a> {
    pub fn new(headers: &'a [String]) -> Self { Self { headers } }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell by header name; short rows read as empty.
    pub fn cell<'r>(&self, row: &'r [String], name: &str) -> &'r str {
        self.position(name)
            .and_then(|i| row.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/* ---------------- Writing ---------------- */

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row to any writer.
pub fn write_row<W: Write>(mut w: W, row: &[String], sep: char) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first { write!(w, "{}", sep)?; } else { first = false; }
        if needs_quotes(cell, sep) {
            let escaped = cell.replace('"', "\"\"");
            write!(w, "\"{}\"", escaped)?;
        } else {
            write!(w, "{}", cell)?;
        }
    }
    writeln!(w)
}

/// Stringify header + rows as-is.
pub fn rows_to_string(headers: Option<&[String]>, rows: &[Vec<String>], sep: char) -> String {
    let mut buf: Vec<u8> = Vec::new();

    if let Some(h) = headers {
        let _ = write_row(&mut buf, h, sep);
    }
    for r in rows {
        let _ = write_row(&mut buf, r, sep);
    }

    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quotes_and_crlf() {
        let text = "a,b\r\n\"x, y\",\"say \"\"hi\"\"\"\r\n\r\nlast,row";
        let rows = parse_rows(text, SEP);
        assert_eq!(rows, vec![
            row!["a", "b"],
            row!["x, y", "say \"hi\""],
            row!["last", "row"],
        ]);
    }

    #[test]
    fn keeps_empty_trailing_cells() {
        let rows = parse_rows("Alice,,\n", SEP);
        assert_eq!(rows, vec![row!["Alice", "", ""]]);
    }

    #[test]
    fn write_then_parse_preserves_awkward_cells() {
        let row = row!["邓 彩浩轩", "a,b", "line\nbreak", ""];
        let text = rows_to_string(None, &[row.clone()], SEP);
        assert_eq!(parse_rows(&text, SEP), vec![row]);
    }

    #[test]
    fn header_index_reads_by_name() {
        let (h, rows) = split_header(parse_rows("\u{feff}x,y\n1,2\n3\n", SEP));
        let h = h.unwrap();
        let idx = HeaderIndex::new(&h);
        assert_eq!(idx.cell(&rows[0], "y"), "2");
        assert_eq!(idx.cell(&rows[1], "y"), "");
        assert_eq!(idx.position("x"), Some(0));
    }
}
