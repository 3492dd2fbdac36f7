mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_report;
pub use progress::StageProgress;
pub use summary::print_summary;

/// Prints the ci-usage banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        styling::banner_title("⏱️ ci-usage"),
        styling::label(env!("CARGO_PKG_VERSION")),
        styling::label("CI build minutes per month")
    );
}
