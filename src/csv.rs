//! Line-oriented CSV tokenizer for spreadsheet exports.
//!
//! A double quote flips an "inside quotes" flag and is not copied into the
//! cell; commas inside quotes do not split. Cells are trimmed. Quoted line
//! breaks are not supported: every physical line is one row.

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Splits `text` into rows of cells. Blank lines are skipped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// Splits one line into trimmed cells.
pub fn parse_line(line: &str) -> Vec<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            QUOTE => in_quotes = !in_quotes,
            DELIMITER if !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}
