use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::{DbError, quote_ident};

/// Patient record domains that have a canned lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Demographics,
    Medications,
    Labs,
    Imaging,
    Procedures,
    Conditions,
    Encounters,
    Allergies,
    Immunizations,
    Careplans,
    Devices,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Demographics,
        Category::Medications,
        Category::Labs,
        Category::Imaging,
        Category::Procedures,
        Category::Conditions,
        Category::Encounters,
        Category::Allergies,
        Category::Immunizations,
        Category::Careplans,
        Category::Devices,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Demographics => "demographics",
            Category::Medications => "medications",
            Category::Labs => "labs",
            Category::Imaging => "imaging",
            Category::Procedures => "procedures",
            Category::Conditions => "conditions",
            Category::Encounters => "encounters",
            Category::Allergies => "allergies",
            Category::Immunizations => "immunizations",
            Category::Careplans => "careplans",
            Category::Devices => "devices",
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(Category::as_str)
    }

    /// Table holding the records for this category
    pub fn table(self) -> &'static str {
        match self {
            Category::Demographics => "patients",
            Category::Labs => "observations",
            Category::Imaging => "imaging_studies",
            other => other.as_str(),
        }
    }

    /// Column referencing the patient id
    pub fn patient_column(self) -> &'static str {
        match self {
            Category::Demographics => "Id",
            _ => "PATIENT",
        }
    }

    /// Column a date range filters on, demographics has none
    pub fn date_column(self) -> Option<&'static str> {
        match self {
            Category::Demographics => None,
            Category::Labs | Category::Imaging | Category::Immunizations => Some("DATE"),
            Category::Medications
            | Category::Procedures
            | Category::Conditions
            | Category::Encounters
            | Category::Allergies
            | Category::Careplans
            | Category::Devices => Some("START"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                DbError::Validation(format!(
                    "unknown category '{wanted}', expected one of: {}",
                    Self::names().collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

/// Inclusive `YYYY-MM-DD` bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Both bounds or neither; a lone bound is rejected rather than silently widened.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, DbError> {
        let (start, end) = match (start, end) {
            (None, None) => return Ok(None),
            (Some(start), Some(end)) => (parse_date("start_date", start)?, parse_date("end_date", end)?),
            _ => {
                return Err(DbError::Validation(
                    "start_date and end_date must be provided together".to_string(),
                ));
            }
        };

        if start > end {
            return Err(DbError::Validation(format!(
                "start_date {start} is after end_date {end}"
            )));
        }

        Ok(Some(Self { start, end }))
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        DbError::Validation(format!("{field} '{value}' is not a YYYY-MM-DD date"))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDataRequest {
    pub patient_id: String,
    pub category: Category,
    pub date_range: Option<DateRange>,
}

impl PatientDataRequest {
    pub fn new(patient_id: impl Into<String>, category: Category) -> Self {
        Self {
            patient_id: patient_id.into(),
            category,
            date_range: None,
        }
    }

    pub fn with_date_range(mut self, date_range: Option<DateRange>) -> Self {
        self.date_range = date_range;
        self
    }

    /// SQL for this lookup with its bind values in placeholder order.
    /// Only the patient id and dates are bound, table and column names come
    /// from the closed [`Category`] set.
    pub(crate) fn statement(&self) -> (String, Vec<String>) {
        let category = self.category;
        let mut sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(category.table()),
            quote_ident(category.patient_column()),
        );
        let mut binds = vec![self.patient_id.clone()];

        if let (Some(range), Some(column)) = (self.date_range, category.date_column()) {
            sql.push_str(&format!(
                " AND substr({}, 1, 10) BETWEEN ? AND ?",
                quote_ident(column)
            ));
            binds.push(range.start.format("%Y-%m-%d").to_string());
            binds.push(range.end.format("%Y-%m-%d").to_string());
        }

        sql.push_str(" ORDER BY rowid");
        (sql, binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!("medications".parse::<Category>().unwrap(), Category::Medications);
        assert_eq!(" Labs ".parse::<Category>().unwrap(), Category::Labs);
        for name in Category::names() {
            assert_eq!(name.parse::<Category>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn unknown_category_lists_valid_ones() {
        let Err(DbError::Validation(message)) = "vitals".parse::<Category>() else {
            panic!("vitals is not a category");
        };
        assert!(message.contains("vitals"));
        for name in Category::names() {
            assert!(message.contains(name), "{message} should list {name}");
        }
    }

    #[test]
    fn categories_map_to_synthea_tables() {
        assert_eq!(Category::Demographics.table(), "patients");
        assert_eq!(Category::Demographics.patient_column(), "Id");
        assert_eq!(Category::Labs.table(), "observations");
        assert_eq!(Category::Imaging.table(), "imaging_studies");
        assert_eq!(Category::Careplans.table(), "careplans");
        assert_eq!(Category::Careplans.patient_column(), "PATIENT");
        assert_eq!(Category::Demographics.date_column(), None);
    }

    #[test]
    fn statement_binds_patient_id() {
        let request = PatientDataRequest::new("P123'; DROP TABLE patients; --", Category::Medications);
        let (sql, binds) = request.statement();
        assert_eq!(
            sql,
            r#"SELECT * FROM "medications" WHERE "PATIENT" = ? ORDER BY rowid"#
        );
        assert_eq!(binds, vec!["P123'; DROP TABLE patients; --".to_string()]);
    }

    #[test]
    fn statement_adds_date_filter() {
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        let (sql, binds) = PatientDataRequest::new("P1", Category::Labs)
            .with_date_range(range)
            .statement();
        assert_eq!(
            sql,
            r#"SELECT * FROM "observations" WHERE "PATIENT" = ? AND substr("DATE", 1, 10) BETWEEN ? AND ? ORDER BY rowid"#
        );
        assert_eq!(binds, ["P1", "2020-01-01", "2020-12-31"]);
    }

    #[test]
    fn demographics_ignores_date_range() {
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        let (sql, binds) = PatientDataRequest::new("P1", Category::Demographics)
            .with_date_range(range)
            .statement();
        assert!(!sql.contains("BETWEEN"));
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn date_ranges_are_validated() {
        assert_eq!(DateRange::parse(None, None).unwrap(), None);
        assert!(matches!(
            DateRange::parse(Some("2020-01-01"), None),
            Err(DbError::Validation(_))
        ));
        assert!(matches!(
            DateRange::parse(Some("01/02/2020"), Some("2020-03-01")),
            Err(DbError::Validation(message)) if message.contains("start_date")
        ));
        assert!(matches!(
            DateRange::parse(Some("2021-01-01"), Some("2020-01-01")),
            Err(DbError::Validation(message)) if message.contains("after")
        ));
    }
}
