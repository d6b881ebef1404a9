//! Operator-facing status lines

use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Meshfile,
    Mesh,
    Node,
    Parameter,
}

/// `   Error: message`, indented under the entity header
pub fn severity_line(severity: Severity, message: &str) -> String {
    let label = match severity {
        Severity::Error => "Error:".red(),
        Severity::Warning => "Warning:".yellow(),
        Severity::Info => "Info:".normal(),
        Severity::Success => "Success:".green(),
    };
    format!("   {} {}", label, message)
}

/// `Mesh lab: message`
pub fn entity_line(entity: Entity, id: &str, message: &str) -> String {
    let header = match entity {
        Entity::Meshfile => format!("Meshfile {}:", id.bold()).yellow(),
        Entity::Mesh => format!("Mesh {}:", id.bold()).magenta(),
        Entity::Node => format!("Node {}:", id.bold()).blue(),
        Entity::Parameter => format!("Parameter {}:", id.bold()).green(),
    };
    format!("{} {}", header, message)
}

pub fn severity(severity: Severity, message: impl AsRef<str>) {
    println!("{}", severity_line(severity, message.as_ref()));
}

pub fn entity(entity: Entity, id: &str, message: impl AsRef<str>) {
    println!("{}", entity_line(entity, id, message.as_ref()));
}

/// Render rows as a plain aligned table with a bold header
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+", separator);

    // Widths come from the plain text so escape codes do not skew alignment
    let render = |cells: Vec<(String, usize)>| {
        let cells: Vec<String> = cells
            .into_iter()
            .zip(&widths)
            .map(|((cell, len), width)| format!(" {}{} ", cell, " ".repeat(width.saturating_sub(len))))
            .collect();
        format!("|{}|", cells.join("|"))
    };

    let header_cells = headers
        .iter()
        .map(|h| (h.bold().to_string(), h.len()))
        .collect();

    let mut lines = vec![separator.clone(), render(header_cells), separator.clone()];
    for row in rows {
        lines.push(render(
            row.iter()
                .map(|cell| (cell.clone(), cell.chars().count()))
                .collect(),
        ));
    }
    lines.push(separator);
    lines.join("\n")
}
