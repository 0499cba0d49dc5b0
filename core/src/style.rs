use std::collections::BTreeMap;

use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;

use crate::report::{LedgerEntry, TextReport};
use crate::testing::{OutcomeKind, SuiteSummary};

#[macro_export]
macro_rules! print_success {
    ($fmt:literal, $($e:tt)*) => {
        use ::colored::Colorize as _;
        println!("{}", format!($fmt, $($e)*).green())
    }
}

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for OutcomeKind {
    fn color(&self) -> Color {
        use OutcomeKind::*;
        if !self::is_truecolor_supported() {
            return match self {
                Passed => Color::Green,
                Failed => Color::Yellow,
                TimedOut => Color::Red,
                Crashed => Color::Magenta,
                BuildFailed => Color::Blue,
                DecodeError => Color::Cyan,
            };
        }

        let (r, g, b) = match self {
            Passed => (30, 180, 40),
            Failed => (210, 138, 4),
            TimedOut => (220, 42, 42),
            Crashed => (171, 40, 200),
            BuildFailed => (40, 90, 210),
            DecodeError => (20, 150, 160),
        };
        Color::TrueColor { r, g, b }
    }
}

pub fn outcome_icon(kind: OutcomeKind) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {:^7} ", kind.to_string())
        .on_color(kind.color())
        .bold()
        .color(fg)
}

/// One-line tally of a candidate, e.g. `----- 7/10 tests failed (...) -----`.
pub fn print_candidate_summary(candidate: &str, summaries: &[SuiteSummary], verdicts: &[LedgerEntry]) {
    let bar = "-".repeat(5);
    print!("{} {} ", bar, candidate.bold());

    let num_total_test: usize = summaries.iter().map(|s| s.total).sum();
    let num_passed: usize = summaries.iter().map(|s| s.passed).sum();
    let num_failed = num_total_test - num_passed;

    if num_passed == num_total_test {
        let msg = format!("All {} tests passed ✨", num_total_test);
        print!("{}", msg.green());
    } else {
        let summary_msg = if num_passed > 0 {
            format!("{}/{} tests failed 💣", num_failed, num_total_test)
        } else {
            format!("All {} tests failed 💀", num_total_test)
        };

        let count = verdicts
            .iter()
            .filter(|e| e.verdict != OutcomeKind::Passed)
            .fold(BTreeMap::<String, (OutcomeKind, usize)>::new(), |mut count, e| {
                count.entry(e.verdict.to_string()).or_insert((e.verdict, 0)).1 += 1;
                count
            });
        let detail_msg = count
            .values()
            .map(|&(kind, cnt)| {
                format!(
                    "{}{}{}",
                    self::outcome_icon(kind),
                    "x".dimmed(),
                    cnt.to_string().bold().bright_white(),
                )
            })
            .collect::<Vec<String>>()
            .join(", ");

        print!("{} ({})", summary_msg.bright_red(), detail_msg);
    }

    println!(" {}", bar);
}

/// Prints per-suite scores, greener the higher.
pub fn print_suite_scores(summaries: &[SuiteSummary]) {
    for s in summaries {
        let pct = s.percentage();
        let score = format!("{:>3}%", pct);
        let score = match pct {
            100 => score.green().bold(),
            50..=99 => score.yellow(),
            _ => score.red(),
        };
        println!("  {:<20} {} ({}/{})", s.name, score, s.passed, s.total);
    }
}

/// Prints the report, highlighting verdict lines.
pub fn print_report(rep: &TextReport) {
    let (cols, _) = terminal::size().unwrap_or((40, 40));
    let bold_bar = "━".repeat(cols as usize).blue().bold();

    println!("{}", bold_bar);
    for line in rep.lines() {
        let Some(verdict_line) = line.strip_prefix("# ") else {
            println!("{}", line);
            continue;
        };
        let verdict = verdict_line
            .split_once(' ')
            .map_or("", |(_test, v)| v.trim_start());
        let color = if verdict.starts_with(TextReport::PASS) {
            OutcomeKind::Passed.color()
        } else if verdict.starts_with(TextReport::TIMEOUT) {
            OutcomeKind::TimedOut.color()
        } else if verdict.starts_with(TextReport::FAIL) {
            OutcomeKind::Failed.color()
        } else {
            OutcomeKind::Crashed.color()
        };
        println!("{} {}", "#".dimmed(), verdict_line.color(color));
    }
    println!("{}", bold_bar);
}

/// Shows the reference next to what the candidate printed.
pub fn print_output_detail(title: &str, kind: OutcomeKind, expected: &str, actual: Option<&str>) {
    let (cols, _) = terminal::size().unwrap_or((40, 40));

    const BOLD_LINE: &str = "━";
    const THIN_LINE: &str = "─";

    let bold_bar = BOLD_LINE.repeat(cols as usize).blue().bold();

    println!(
        "\n{}: {}\n{}",
        title.color(Color::BrightYellow).bold(),
        self::outcome_icon(kind),
        bold_bar,
    );

    fn print_sub_title(s: &str, cols: usize) {
        println!(
            "{}{}",
            s.cyan().bold(),
            THIN_LINE
                .repeat(cols.saturating_sub(s.len() + 1))
                .bright_black(),
        )
    }

    fn print_lines(text: &str) {
        let lines: Vec<_> = text.lines().collect();
        if lines.is_empty() {
            println!("{}", "<EMPTY>".magenta().dimmed());
            return;
        }
        for line in lines {
            let trimmed = line.trim_end();
            print!("{}", trimmed);

            let num_trailing_whitespace = line.len() - trimmed.len();
            if num_trailing_whitespace > 0 {
                print!("{}", " ".repeat(num_trailing_whitespace).on_red());
            }
            println!();
        }
    }

    print_sub_title("[expected]", cols as usize);
    print_lines(expected);

    print_sub_title("[stdout]", cols as usize);
    match actual {
        Some(actual) => print_lines(actual),
        None => println!("{}", "<NOT CAPTURED>".magenta().dimmed()),
    }

    println!("{}", bold_bar);
}
