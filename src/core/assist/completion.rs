//! Completion candidates.
//!
//! Candidates come from the static grammar first, then from items the
//! controller told us about. Matching is an exact, case-sensitive prefix
//! match and each source is sorted on its own. Nothing is cached between
//! calls.

use super::grammar::Grammar;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateSource {
    Grammar,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub text: String,
    pub source: CandidateSource,
}

/// Names discovered from the active printer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicItems {
    /// Macro and command names from `printer.gcode.help`
    pub macros: Vec<String>,
    /// Printer object names
    pub objects: Vec<String>,
    /// Configured printer names, offered after printer built-ins
    pub printers: Vec<String>,
}

/// Candidates for the word under the cursor, and the byte range they replace
#[derive(Debug, Clone, PartialEq)]
pub struct LineCompletion {
    pub replace: Range<usize>,
    pub candidates: Vec<Candidate>,
}

impl LineCompletion {
    /// `line` with the word replaced by candidate `index`
    pub fn apply(&self, line: &str, index: usize) -> Option<String> {
        let candidate = self.candidates.get(index)?;
        let mut result = String::with_capacity(line.len() + candidate.text.len());
        result.push_str(&line[..self.replace.start]);
        result.push_str(&candidate.text);
        result.push_str(&line[self.replace.end..]);
        Some(result)
    }
}

const PRINTER_BUILTINS: &[&str] = &[":printer", ":connect", ":disconnect", ":estop"];

#[derive(Debug, Clone, Default)]
pub struct CompletionEngine {
    grammar: Grammar,
}

impl CompletionEngine {
    pub fn new(grammar: Grammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Complete `partial` as a command name: grammar matches, then matches
    /// among `dynamic` that the grammar does not already offer.
    pub fn complete<S: AsRef<str>>(&self, partial: &str, dynamic: &[S]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .grammar
            .commands()
            .iter()
            .filter(|command| command.starts_with(partial))
            .map(|command| Candidate {
                text: command.clone(),
                source: CandidateSource::Grammar,
            })
            .collect();

        let extra: BTreeSet<&str> = dynamic
            .iter()
            .map(|item| item.as_ref())
            .filter(|item| item.starts_with(partial) && !self.grammar.contains(item))
            .collect();
        candidates.extend(extra.into_iter().map(|item| Candidate {
            text: item.to_string(),
            source: CandidateSource::Dynamic,
        }));

        candidates
    }

    /// Complete the word at the end of an input line.
    ///
    /// The first word of a command completes against command names and
    /// macros; the argument of a printer built-in against printer names; any
    /// other word against printer object names.
    pub fn complete_line(&self, line: &str, items: &DynamicItems) -> LineCompletion {
        let segment_start = line.rfind(',').map(|i| i + 1).unwrap_or(0);
        let word_start = line[segment_start..]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| segment_start + i + c.len_utf8())
            .unwrap_or(segment_start);
        let word = &line[word_start..];
        let before: Vec<&str> = line[segment_start..word_start].split_whitespace().collect();

        let candidates = match before.as_slice() {
            [] => self.complete(word, &items.macros),
            [builtin] if PRINTER_BUILTINS.contains(builtin) => dynamic_only(word, &items.printers),
            [builtin, ..] if builtin.starts_with(':') => Vec::new(),
            _ => dynamic_only(word, &items.objects),
        };

        LineCompletion {
            replace: word_start..line.len(),
            candidates,
        }
    }
}

fn dynamic_only(partial: &str, items: &[String]) -> Vec<Candidate> {
    let matches: BTreeSet<&str> = items
        .iter()
        .map(String::as_str)
        .filter(|item| item.starts_with(partial))
        .collect();
    matches
        .into_iter()
        .map(|item| Candidate {
            text: item.to_string(),
            source: CandidateSource::Dynamic,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_grammar_before_dynamic() {
        let engine = CompletionEngine::new(Grammar::new(["HOME", "HELP"]));
        let candidates = engine.complete("HE", &["HEAT_BED"]);
        assert_eq!(texts(&candidates), vec!["HELP", "HEAT_BED"]);
        assert_eq!(candidates[0].source, CandidateSource::Grammar);
        assert_eq!(candidates[1].source, CandidateSource::Dynamic);
    }

    #[test]
    fn test_each_source_sorted() {
        let engine = CompletionEngine::new(Grammar::new(["PAUSE", "PRINT", "PREHEAT"]));
        let candidates = engine.complete("P", &["PURGE_LINE", "PARK", "PRINT_START", "PRINT"]);
        assert_eq!(
            texts(&candidates),
            vec!["PAUSE", "PREHEAT", "PRINT", "PARK", "PRINT_START", "PURGE_LINE"]
        );
    }

    #[test]
    fn test_case_sensitive() {
        let engine = CompletionEngine::default();
        assert!(engine.complete("g2", &["g28_custom"]).iter().all(|c| c.text == "g28_custom"));
        assert!(texts(&engine.complete("G2", &Vec::<String>::new())).contains(&"G28"));
    }

    #[test]
    fn test_restartable() {
        let engine = CompletionEngine::default();
        let macros = vec!["PRINT_START".to_string()];
        let first = engine.complete("PR", &macros);
        let second = engine.complete("PR", &macros);
        assert_eq!(first, second);
    }

    #[test]
    fn test_complete_line_positions() {
        let engine = CompletionEngine::default();
        let items = DynamicItems {
            macros: vec!["CLEAN_NOZZLE".to_string()],
            objects: vec!["extruder".to_string(), "extruder1".to_string(), "heater_bed".to_string()],
            printers: vec!["ender".to_string(), "voron".to_string()],
        };

        let completion = engine.complete_line("G28, CLEAN", &items);
        assert_eq!(texts(&completion.candidates), vec!["CLEAN_NOZZLE"]);
        assert_eq!(completion.apply("G28, CLEAN", 0).unwrap(), "G28, CLEAN_NOZZLE");

        let completion = engine.complete_line(":printer v", &items);
        assert_eq!(texts(&completion.candidates), vec!["voron"]);
        assert_eq!(completion.replace, 9..10);

        let completion = engine.complete_line("SET_HEATER_TEMPERATURE ext", &items);
        assert_eq!(texts(&completion.candidates), vec!["extruder", "extruder1"]);

        let completion = engine.complete_line(":history e", &items);
        assert!(completion.candidates.is_empty());

        let completion = engine.complete_line(":pr", &items);
        assert_eq!(texts(&completion.candidates), vec![":print", ":printer", ":printers"]);
    }

    #[test]
    fn test_complete_line_multibyte_whitespace() {
        let engine = CompletionEngine::default();
        let items = DynamicItems {
            objects: vec!["extruder".to_string()],
            ..Default::default()
        };

        let completion = engine.complete_line("G28\u{a0}X", &items);
        assert_eq!(completion.replace, 5..6);
        assert!(completion.candidates.is_empty());

        let line = "SET_HEATER_TEMPERATURE\u{3000}ext";
        let completion = engine.complete_line(line, &items);
        assert_eq!(texts(&completion.candidates), vec!["extruder"]);
        assert_eq!(
            completion.apply(line, 0).unwrap(),
            "SET_HEATER_TEMPERATURE\u{3000}extruder"
        );

        let completion = engine.complete_line("M105\u{a0}", &items);
        assert_eq!(completion.replace, 6..6);
    }
}
