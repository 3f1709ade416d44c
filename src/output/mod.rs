mod logs;
mod progress;
mod status;
mod styling;
mod tables;

pub use logs::format_entry;
pub use progress::WaitProgress;
pub use status::{print_statuses, render_statuses};
pub use styling::{dim, magenta_bold};

/// Prints the `stagewatch` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("stagewatch"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Pipeline stage logs and completion")
    );
}
