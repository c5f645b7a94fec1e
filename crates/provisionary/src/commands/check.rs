//! `provisionary check`: validate every provisioning directory offline.

use serde::Serialize;
use tabled::Tabled;

use provisionary_core::{CheckReport, Stage};

use super::Runtime;
use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

/// One checked file and its problems, if any.
#[derive(Debug, Serialize)]
struct FileCheck {
    kind: &'static str,
    file: String,
    ok: bool,
    problems: Vec<String>,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Problems")]
    problems: String,
}

fn flatten(reports: &[(Stage, CheckReport)]) -> Vec<FileCheck> {
    let mut checks = Vec::new();
    for (stage, report) in reports {
        let kind = stage.dir_name();
        for file in &report.files {
            let problems: Vec<String> = report.problems_for(file).map(str::to_owned).collect();
            checks.push(FileCheck {
                kind,
                file: file.display().to_string(),
                ok: problems.is_empty(),
                problems,
            });
        }
        // Errors not tied to a listed file (unreadable directory, ...).
        for err in &report.errors {
            if !report.files.contains(&err.path) {
                checks.push(FileCheck {
                    kind,
                    file: err.path.display().to_string(),
                    ok: false,
                    problems: vec![err.reason.clone()],
                });
            }
        }
    }
    checks
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let rt = Runtime::bootstrap(global)?;
    let checks = flatten(&rt.service.check().await);

    let color = output::should_color(global.color);
    let rendered = output::render_list(
        global.output,
        &checks,
        |c| CheckRow {
            kind: c.kind,
            file: c.file.clone(),
            status: output::status_label(c.ok, color),
            problems: c.problems.join("; "),
        },
        |c| {
            let status = if c.ok { "ok" } else { "invalid" };
            format!("{status}\t{}", c.file)
        },
    )?;
    output::print_output(&rendered, global.quiet);

    let count = checks.iter().filter(|c| !c.ok).count();
    if count > 0 {
        return Err(CliError::CheckFailed { count });
    }
    Ok(())
}
