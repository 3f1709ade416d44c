use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::pipeline::PipelineState;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn state_cell(state: PipelineState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        PipelineState::Success => cell.fg(TableColor::Green),
        PipelineState::Failure => cell.fg(TableColor::Red),
        PipelineState::Aborted => cell.fg(TableColor::Magenta),
        PipelineState::Running => cell.fg(TableColor::Yellow),
        PipelineState::Waiting => cell.fg(TableColor::Grey),
    }
}
