//! Interactive sanitiser for checking payloads by hand.

use std::io::{self, BufRead, Write};

use ronin_core::sanitiser::sanitise_response_text;

const REPL_TOOL_NAME: &str = "manual_test";

pub fn run<R: BufRead, W: Write>(mut input: R, mut output: W) -> io::Result<()> {
    writeln!(output, "=== Response Sanitiser Interactive Mode ===")?;
    writeln!(output, "Type text to sanitise. Type 'exit' to quit.")?;

    let mut line = String::new();
    loop {
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if matches!(text.to_lowercase().as_str(), "exit" | "quit") {
            writeln!(output, "Exiting test mode.")?;
            break;
        }

        let (cleaned, was_sanitised) = sanitise_response_text(text, REPL_TOOL_NAME);
        writeln!(output, "Sanitised Output:")?;
        writeln!(output, "{cleaned}")?;
        writeln!(output, "Was Sanitised: {was_sanitised}")?;
        writeln!(output, "-")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(input: &str) -> String {
        let mut output = Vec::new();
        run(input.as_bytes(), &mut output).expect("repl should run");
        String::from_utf8(output).expect("utf8 output")
    }

    #[test]
    fn sanitises_each_line_until_exit() {
        let output = session("hello <!-- hidden --> world\nEXIT\nnever read\n");
        assert!(output.contains("Sanitised Output:\nhello  world\nWas Sanitised: true\n"));
        assert!(output.contains("Exiting test mode."));
        assert!(!output.contains("never read"));
    }

    #[test]
    fn stops_at_end_of_input() {
        let output = session("plain text");
        assert!(output.contains("Sanitised Output:\nplain text\nWas Sanitised: false\n"));
        assert!(!output.contains("Exiting test mode."));
    }
}
