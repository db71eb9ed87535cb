//! Console output formatting
//!
//! Prints a human-readable report: one line per control, indented lines per
//! test, then control and test summaries.

use policy_kit::results::{ControlResult, ControlStatus, ProfileResult, TestResult, TestStatus};
use policy_kit::RunResult;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Print run results to console in a human-readable format
pub fn print_results(result: &RunResult) {
    println!("Platform: {}", result.platform);
    println!();

    for profile in &result.profiles {
        print_profile(profile);
    }

    print_summary(result);
}

fn print_profile(profile: &ProfileResult) {
    match &profile.title {
        Some(title) => println!("Profile: {} ({}@{})", title, profile.name, profile.version),
        None => println!("Profile: {}@{}", profile.name, profile.version),
    }
    if let Some(parent) = &profile.parent {
        println!("  Required by: {}", parent);
    }
    println!();

    if profile.controls.is_empty() {
        println!("  No controls selected");
    }
    for control in &profile.controls {
        print_control(control);
    }
    println!();
}

fn control_icon(status: ControlStatus) -> String {
    match status {
        ControlStatus::Passed => format!("{}✔{}", GREEN, RESET),
        ControlStatus::Failed => format!("{}✗{}", RED, RESET),
        ControlStatus::Skipped => format!("{}↺{}", YELLOW, RESET),
    }
}

fn test_icon(status: TestStatus) -> String {
    match status {
        TestStatus::Passed => format!("{}✔{}", GREEN, RESET),
        TestStatus::Failed | TestStatus::Error => format!("{}✗{}", RED, RESET),
        TestStatus::Skipped => format!("{}↺{}", YELLOW, RESET),
    }
}

fn print_control(control: &ControlResult) {
    let title = control.title.as_deref().unwrap_or("");
    println!("  {}  {}: {}", control_icon(control.status), control.id, title);
    for test in &control.results {
        print_test(test);
    }
}

fn print_test(test: &TestResult) {
    println!("     {}  {}", test_icon(test.status), test.code_desc);
    if let Some(message) = test.message.as_deref().filter(|m| !m.is_empty()) {
        let prefix = if test.status == TestStatus::Error { "ERROR: " } else { "" };
        for line in message.lines().take(3) {
            println!("        {}{}", prefix, line);
        }
    }
}

fn print_summary(result: &RunResult) {
    let controls = &result.statistics.controls;
    let tests = &result.statistics.tests;

    println!("────────────────────────────────────────────────────────────────────────────────");
    println!(
        "Profile Summary: {}{} successful control{}{}, {}{} control failure{}{}, {}{} control{} skipped{}",
        GREEN,
        controls.passed,
        plural(controls.passed),
        RESET,
        RED,
        controls.failed,
        plural(controls.failed),
        RESET,
        YELLOW,
        controls.skipped,
        plural(controls.skipped),
        RESET
    );
    print!(
        "Test Summary: {}{} successful{}, {}{} failure{}{}, {}{} skipped{}",
        GREEN,
        tests.passed,
        RESET,
        RED,
        tests.failed,
        plural(tests.failed),
        RESET,
        YELLOW,
        tests.skipped,
        RESET
    );
    if tests.error > 0 {
        print!(", {}{} error{}{}", RED, tests.error, plural(tests.error), RESET);
    }
    println!();
    println!("Duration: {:.2}s", result.statistics.duration);
    println!("────────────────────────────────────────────────────────────────────────────────");
    println!();
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icons() {
        assert!(control_icon(ControlStatus::Skipped).contains('↺'));
        assert!(test_icon(TestStatus::Error).contains('✗'));
        assert_eq!(plural(1), "");
        assert_eq!(plural(0), "s");
    }

    #[test]
    fn test_print_does_not_panic() {
        print_results(&crate::output::fixtures::run_result());
    }
}
