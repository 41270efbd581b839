//! CSV import of subject marks for a single student's mark sheet.

use std::io::Read;

use serde::{Deserialize, Deserializer};

use super::results::SubjectMark;

/// Read `subject_id, subject_name, max_marks, obtained_marks, absent` rows.
///
/// `subject_name` defaults to the subject id, `obtained_marks` may be blank for an absent
/// subject, and `absent` accepts the usual boolean spellings (blank means present).
pub fn parse_marks_csv<R: Read>(reader: R) -> Result<Vec<SubjectMark>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut marks = Vec::new();

    for row in csv_reader.deserialize::<MarkRow>() {
        let row = row?;
        marks.push(SubjectMark {
            subject_name: row
                .subject_name
                .unwrap_or_else(|| row.subject_id.clone()),
            subject_id: row.subject_id,
            max_marks: row.max_marks,
            obtained_marks: row.obtained_marks.unwrap_or(0.0),
            is_absent: row.absent,
        });
    }

    Ok(marks)
}

#[derive(Debug, Deserialize)]
struct MarkRow {
    subject_id: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    subject_name: Option<String>,
    max_marks: f64,
    #[serde(default)]
    obtained_marks: Option<f64>,
    #[serde(default, deserialize_with = "flag")]
    absent: bool,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|raw| !raw.trim().is_empty()))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => Ok(false),
        "1" | "true" | "yes" | "y" | "ab" | "absent" => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "unrecognised absent flag '{other}'"
        ))),
    }
}
