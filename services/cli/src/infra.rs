use academic_lifecycle::academics::{DepartmentId, Placement, ProgramId, SessionId};
use academic_lifecycle::AppError;
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Target placement flags shared by the promotion commands.
#[derive(Args, Debug, Clone)]
pub(crate) struct TargetArgs {
    /// Academic session to promote into, e.g. 2026-27
    #[arg(long)]
    pub(crate) to_session: String,
    /// Program of the target placement
    #[arg(long)]
    pub(crate) to_program: String,
    /// Optional department of the target placement
    #[arg(long)]
    pub(crate) to_department: Option<String>,
    /// Year of study in the target session
    #[arg(long)]
    pub(crate) to_year: u8,
    #[arg(long, default_value = "A")]
    pub(crate) to_division: String,
}

impl TargetArgs {
    pub(crate) fn placement(&self) -> Placement {
        Placement {
            session: SessionId(self.to_session.clone()),
            program: ProgramId(self.to_program.clone()),
            department: self.to_department.clone().map(DepartmentId),
            year: self.to_year,
            division: self.to_division.clone(),
        }
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
