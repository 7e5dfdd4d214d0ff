use super::command_registry::{CommandError, CommandResult};
use crate::hub::operator::MemberRow;

/// Column headers of a search result table
const MEMBER_COLUMNS: [&str; 5] = ["IP", "USERNAME", "IS_ONLINE", "IS_BANNED", "SEND_TIMES"];

/// Format a command result into a string response
///
/// # Arguments
/// * `result` - The command result to format
///
/// # Returns
/// * `String` - The formatted response string
pub fn format_response(result: CommandResult) -> String {
    match result {
        Ok(msg) => msg,
        Err(CommandError::ExecutionError(err)) => format!("Error: {}", err),
        Err(err) => format!("Error: {}", err),
    }
}

/// Render search rows as an aligned table; an empty result is the header alone
pub fn format_members(rows: &[MemberRow]) -> String {
    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.ip.clone(),
                row.username.clone(),
                row.online.to_string(),
                row.banned.to_string(),
                row.send_times.to_string(),
            ]
        })
        .collect();

    let mut widths = MEMBER_COLUMNS.map(str::len);
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |line: &[&str]| {
        line.iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![render(&MEMBER_COLUMNS[..])];
    out.extend(
        cells
            .iter()
            .map(|line| render(&line.each_ref().map(String::as_str)[..])),
    );
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ip: &str, name: &str, sent: u64) -> MemberRow {
        MemberRow {
            ip: ip.to_string(),
            username: name.to_string(),
            online: true,
            banned: false,
            send_times: sent,
        }
    }

    #[test]
    fn test_format_response_prefixes_errors() {
        assert_eq!(format_response(Ok("done".to_string())), "done");
        assert_eq!(
            format_response(Err(CommandError::UnknownCommand("foo".to_string()))),
            "Error: Unknown command: foo"
        );
        assert_eq!(format_response(Err(CommandError::EmptyCommand)), "Error: Empty command");
    }

    #[test]
    fn test_empty_table_is_header_only() {
        assert_eq!(
            format_members(&[]),
            "IP | USERNAME | IS_ONLINE | IS_BANNED | SEND_TIMES"
        );
    }

    #[test]
    fn test_table_columns_align() {
        let table = format_members(&[row("10.0.0.1", "alice", 3), row("192.168.100.200", "b", 12)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("IP              | USERNAME |"));
        assert!(lines[1].starts_with("10.0.0.1        | alice    | true"));
        assert!(lines[2].ends_with("| 12"));
    }
}
