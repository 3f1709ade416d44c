use comfy_table::Cell;

use crate::pipeline::PipelineStatus;

use super::tables::{create_table, header, state_cell};

/// Renders per-worker stage statuses as a table.
pub fn render_statuses(statuses: &[PipelineStatus]) -> String {
    let mut table = create_table();
    table.set_header(header(&[
        "Server", "Replica", "State", "Steps", "Started", "Finished",
    ]));

    for status in statuses {
        let steps = status
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{i}: {}", step.state))
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            Cell::new(&status.server),
            Cell::new(&status.replica),
            state_cell(status.state),
            Cell::new(if steps.is_empty() { "-".to_string() } else { steps }),
            Cell::new(status.started_at.as_deref().unwrap_or("-")),
            Cell::new(status.finished_at.as_deref().unwrap_or("-")),
        ]);
    }

    table.to_string()
}

pub fn print_statuses(statuses: &[PipelineStatus]) {
    if statuses.is_empty() {
        println!("No workers reported for this stage.");
    } else {
        println!("{}", render_statuses(statuses));
    }
}
