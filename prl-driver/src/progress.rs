use std::sync::OnceLock;

use regex::Regex;

/// A generic trait for parsing command output to drive a progress display.
pub trait ProgressParser {
    /// Parses a single line of output.
    fn parse_line(&mut self, line: &str);
    /// Marks the progress as finished.
    fn finish(&mut self);
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3})\s*%").expect("Hardcoded percent regex pattern should always compile")
    })
}

/// Extract a completion percentage from a line of `prlctl` output such as
/// `Copying hard disk... 45 %`.
pub fn parse_percent(line: &str) -> Option<u8> {
    percent_regex()
        .captures_iter(line)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .filter(|p| *p <= 100)
}

/// Forwards monotonically increasing percentages to a callback.
///
/// `prlctl clone` reports progress per copied disk, so the raw value can
/// restart from zero; those regressions are dropped.
pub struct PercentParser<'a> {
    last: Option<u8>,
    on_progress: &'a mut dyn FnMut(u8),
}

impl<'a> PercentParser<'a> {
    pub fn new(on_progress: &'a mut dyn FnMut(u8)) -> Self {
        Self {
            last: None,
            on_progress,
        }
    }
}

impl ProgressParser for PercentParser<'_> {
    fn parse_line(&mut self, line: &str) {
        let Some(percent) = parse_percent(line) else {
            return;
        };
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        (self.on_progress)(percent);
    }

    fn finish(&mut self) {
        if self.last.is_some_and(|last| last < 100) {
            self.last = Some(100);
            (self.on_progress)(100);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("Copying hard disk... 45 %"), Some(45));
        assert_eq!(parse_percent("Progress: 100%"), Some(100));
        assert_eq!(parse_percent("Clone the VM..."), None);
        assert_eq!(parse_percent("bogus 250%"), None);
    }

    #[test]
    fn test_percent_parser_is_monotonic() {
        let mut seen = Vec::new();
        {
            let mut record = |p: u8| seen.push(p);
            let mut parser = PercentParser::new(&mut record);
            for line in ["10 %", "10 %", "55 %", "0 %", "90 %", "noise"] {
                parser.parse_line(line);
            }
            parser.finish();
        }
        assert_eq!(seen, vec![10, 55, 90, 100]);
    }

    #[test]
    fn test_finish_without_progress_reports_nothing() {
        let mut seen = Vec::new();
        {
            let mut record = |p: u8| seen.push(p);
            let mut parser = PercentParser::new(&mut record);
            parser.finish();
        }
        assert!(seen.is_empty());
    }
}
