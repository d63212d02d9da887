//! Panic reporting for the CLI boundary, mirroring the ambient stack's
//! own top-level panic handler: persist a human-readable report instead
//! of letting a bare Rust backtrace hit the terminal.

use human_panic::report::{Method, Report};

const OPEN_ISSUE_MESSAGE: &str = "this is a demo CLI around the task execution core; \
     re-run with RUST_BACKTRACE=1 for a full trace";

pub fn install() {
    std::panic::set_hook(Box::new(|panic_info| {
        let cause = panic_info.to_string();
        let explanation = match panic_info.location() {
            Some(location) => format!("file '{}' at line {}\n", location.file(), location.line()),
            None => "unknown.".to_string(),
        };

        let report = Report::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            Method::Panic,
            explanation,
            cause,
        );

        let report_message = match report.persist() {
            Ok(path) => format!("A report has been written to {}\n\n{OPEN_ISSUE_MESSAGE}", path.display()),
            Err(e) => format!(
                "An error occurred while writing the panic report: {e}\n\n{OPEN_ISSUE_MESSAGE}"
            ),
        };

        eprintln!("Oops! pta-agent has crashed.\n\n{report_message}");
    }));
}
