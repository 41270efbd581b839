mod cli;
mod commands;
mod demo;
mod infra;
mod workspace;

use academic_lifecycle::AppError;

pub fn run() -> Result<(), AppError> {
    cli::run()
}
