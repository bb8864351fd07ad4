//! Readable tracebacks for script failures.
//!
//! Compiled scripts keep only line numbers, so the traceback is rebuilt from
//! the original source text with a window of lines around each reported line.

/// Lines shown on each side of the offending line.
pub const TRACEBACK_CONTEXT_LINES: usize = 5;

const HEADER: &str = "########## Script Content  ############\n\n";
const FOOTER: &str = "\n########## End Script Content ############\n";

/// Builds a traceback listing the source around each of `line_numbers`.
///
/// Line numbers are 1-based; the offending line is marked with `->`.
pub fn create_traceback(source: &str, line_numbers: &[usize]) -> String {
    let mut output = String::from("\n");
    // index 0 is a blank line so indices line up with 1-based line numbers
    let content = format!("\n{}", source);
    let lines: Vec<&str> = content.lines().collect();

    for &line_num in line_numbers {
        output.push('\n');
        output.push_str(HEADER);
        let start = line_num.saturating_sub(TRACEBACK_CONTEXT_LINES);
        let end = line_num + TRACEBACK_CONTEXT_LINES;
        for (idx, text) in lines.iter().enumerate().take(end).skip(start) {
            if idx == line_num {
                output.push_str(&format!("->{}: {}\n", idx, text));
            } else {
                output.push_str(&format!("   {}: {}\n", idx, text));
            }
        }
    }
    output.push_str(FOOTER);
    output
}
