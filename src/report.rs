use std::fmt;
use std::fmt::Display;
use std::time::Duration;

use console::style;
use flume::Receiver;

const COLUMNS: [&str; 7] = ["project", "group", "job", "runtime", "passed", "failed", "warnings"];

/// Outcome of one executed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub project: String,
    pub group: String,
    pub job: String,
    pub runtime: Duration,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
}

impl ReportRow {
    fn runtime(&self) -> String {
        format!("{:.3}", self.runtime.as_secs_f64())
    }

    fn cells(&self) -> [String; 7] {
        [
            self.project.clone(),
            self.group.clone(),
            self.job.clone(),
            self.runtime(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.warnings.to_string(),
        ]
    }
}

/// Rows of one run, in execution order.
#[derive(Debug, Default, Clone)]
pub struct Report {
    rows: Vec<ReportRow>,
}

impl Report {
    pub fn add(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// Collects rows until every sender is gone.
    pub async fn collect(rx: Receiver<ReportRow>) -> Report {
        let mut report = Report::default();
        while let Ok(row) = rx.recv_async().await {
            report.add(row);
        }
        report
    }

    pub fn to_csv(&self) -> String {
        let mut lines = vec![COLUMNS.join(",")];
        lines.extend(self.rows.iter().map(|row| row.cells().join(",")));
        lines.join("\n")
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<[String; 7]> = self.rows.iter().map(ReportRow::cells).collect();

        let mut widths = COLUMNS.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        writeln!(f, "{}", style("Report").yellow().bold())?;

        let header: Vec<String> = COLUMNS
            .iter()
            .zip(widths)
            .map(|(name, width)| format!("{name:<width$}"))
            .collect();
        writeln!(f, "{}", style(header.join(" | ")).bold())?;

        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;

        for (row, cell) in self.rows.iter().zip(&cells) {
            let line: Vec<String> = cell
                .iter()
                .zip(widths)
                .enumerate()
                .map(|(i, (text, width))| {
                    let padded = format!("{text:<width$}");
                    match i {
                        4 if row.passed > 0 => style(padded).green().to_string(),
                        5 if row.failed > 0 => style(padded).red().to_string(),
                        6 if row.warnings > 0 => style(padded).yellow().to_string(),
                        _ => padded,
                    }
                })
                .collect();
            writeln!(f, "{}", line.join(" | "))?;
        }

        Ok(())
    }
}
