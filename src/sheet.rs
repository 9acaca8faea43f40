use std::path::Path;

use thiserror::Error;

use crate::store::{CandidateStudent, RowFailure};

/// Columns the uploaded sheet must carry. Anything else is ignored.
pub const REQUIRED_COLUMNS: [&str; 5] = ["name", "age", "class_label", "email", "phone_number"];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot read sheet: {0}")]
    Io(#[from] std::io::Error),
    #[error("sheet has no header row")]
    Empty,
    #[error("sheet header row is malformed")]
    BadHeader,
    #[error("sheet is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

impl SheetError {
    pub fn code(&self) -> &'static str {
        match self {
            SheetError::Io(_) => "sheet_unreadable",
            SheetError::Empty | SheetError::BadHeader | SheetError::MissingColumns(_) => {
                "validation_failed"
            }
        }
    }
}

/// One parsed data row, tagged with its 1-based position among the sheet's
/// data rows so failures can be reported against the file the user uploaded.
#[derive(Debug, Clone)]
pub struct SheetRow {
    pub row: usize,
    pub record: CandidateStudent,
}

#[derive(Debug)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
    pub skipped: Vec<RowFailure>,
}

pub fn read_sheet(path: &Path) -> Result<Sheet, SheetError> {
    let text = std::fs::read_to_string(path)?;
    parse_sheet(&text)
}

/// Parse a comma-separated sheet. The header set must be a superset of
/// REQUIRED_COLUMNS; that check happens here, before anything reaches
/// storage. Individual bad data rows are collected into `skipped`, never
/// escalated to a whole-sheet failure.
pub fn parse_sheet(text: &str) -> Result<Sheet, SheetError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines.next().ok_or(SheetError::Empty)?;
    let headers: Vec<String> = split_fields(header_line)
        .ok_or(SheetError::BadHeader)?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let columns = ColumnMap::resolve(&headers)?;

    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for (i, line) in lines.enumerate() {
        let row = i + 1;
        let Some(fields) = split_fields(line) else {
            skipped.push(skip(row, None, "malformed row (unclosed quote)"));
            continue;
        };
        match columns.extract(&fields) {
            Ok(record) => rows.push(SheetRow { row, record }),
            Err(reason) => {
                let email = columns.cell(&fields, columns.email).map(str::to_string);
                skipped.push(skip(row, email, &reason));
            }
        }
    }

    Ok(Sheet {
        headers,
        rows,
        skipped,
    })
}

fn skip(row: usize, email: Option<String>, message: &str) -> RowFailure {
    RowFailure {
        row,
        email,
        message: message.to_string(),
    }
}

struct ColumnMap {
    name: usize,
    age: usize,
    class_label: usize,
    email: usize,
    phone_number: usize,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self, SheetError> {
        let find = |wanted: &str| headers.iter().position(|h| h == wanted);
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|&c| find(c).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(SheetError::MissingColumns(missing));
        }
        Ok(ColumnMap {
            name: find("name").unwrap(),
            age: find("age").unwrap(),
            class_label: find("class_label").unwrap(),
            email: find("email").unwrap(),
            phone_number: find("phone_number").unwrap(),
        })
    }

    fn cell<'a>(&self, fields: &'a [String], idx: usize) -> Option<&'a str> {
        fields.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    fn extract(&self, fields: &[String]) -> Result<CandidateStudent, String> {
        let name = self
            .cell(fields, self.name)
            .ok_or("name cell is empty")?
            .to_string();
        let email = self
            .cell(fields, self.email)
            .ok_or("email cell is empty")?
            .to_string();
        let phone_number = self
            .cell(fields, self.phone_number)
            .ok_or("phone_number cell is empty")?
            .to_string();
        let age_cell = self.cell(fields, self.age).ok_or("age cell is empty")?;
        let age: i64 = age_cell
            .parse()
            .map_err(|_| format!("age is not an integer: {age_cell}"))?;
        let class_label = self.cell(fields, self.class_label).map(str::to_string);
        Ok(CandidateStudent {
            name,
            age,
            class_label,
            email,
            phone_number,
        })
    }
}

/// Split one line into comma-separated fields. Double quotes wrap fields that
/// contain commas; a doubled quote inside a quoted field is a literal quote.
/// Returns None when a quote is left unclosed.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c != '"' {
                    field.push(c);
                } else if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return None;
            }
            fields.push(field);
            match chars.next() {
                Some(',') => continue,
                None => return Some(fields),
                Some(_) => return None,
            }
        }
        loop {
            match chars.next() {
                Some(',') => break,
                Some(c) => field.push(c),
                None => {
                    fields.push(field);
                    return Some(fields);
                }
            }
        }
        fields.push(field);
    }
}
