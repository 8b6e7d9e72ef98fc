//! Regex based ltrace line classifier

use std::sync::LazyLock;

use regex::Regex;

use crate::ltrace::{Call, CallKind, CallRecord};

/// Ordered (kind, pattern) table, the first matching pattern wins.
///
/// Patterns overlap, for example an unfinished call also looks like the start of a complete one,
/// so order matters.
/// Capture groups are: pid, name, arguments, and optional return value.
pub const DEFAULT_PATTERNS: [(CallKind, &str); 5] = [
    (
        CallKind::Resumed,
        r"([0-9]+)\s*<\.\.\. (.*) (?:resumed>(.*)=\s)(-?[0-9]+)$",
    ),
    (CallKind::Unfinished, r"([0-9]+)\s*(.*)\((.*)<unfinished.*$"),
    (CallKind::NoReturn, r"([0-9]+)\s*(.*)\((.*)<no return.*$"),
    (
        CallKind::Special,
        r"([0-9]+)\s*[-+]*\s+(.*)\s*\((.*)\)\s+[-+]*$",
    ),
    (
        CallKind::FunctionCall,
        r"([0-9]+)\s*(.*?)\((.*)\).*?=\s+(.+)$",
    ),
];

/// Minimum number of capture groups (pid, name, arguments) of a pattern
const MIN_GROUPS: usize = 3;

/// Separator between caller and callee in ltrace function names (ie. 'prog->malloc')
const CALLER_SEP: &str = "->";

/// Classifier built from [`DEFAULT_PATTERNS`]
#[expect(clippy::unwrap_used)]
pub static DEFAULT_CLASSIFIER: LazyLock<Classifier> =
    LazyLock::new(|| Classifier::new(DEFAULT_PATTERNS).unwrap());

/// Invalid pattern table
#[derive(thiserror::Error, Debug)]
pub enum ClassifierError {
    /// Pattern is not a valid regex
    #[error("Invalid {kind} pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// Kind the pattern is for
        kind: CallKind,
        /// Pattern source
        pattern: String,
        /// Underlying error
        source: regex::Error,
    },
    /// Pattern does not capture at least pid, name and arguments
    #[error("{kind} pattern {pattern:?} has {groups} capture groups, at least {MIN_GROUPS} are required")]
    TooFewGroups {
        /// Kind the pattern is for
        kind: CallKind,
        /// Pattern source
        pattern: String,
        /// Number of capture groups in pattern
        groups: usize,
    },
}

/// Result of classifying a line
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Classification {
    /// Line is a call or event
    Record(CallRecord),
    /// No pattern matched, or the match is unusable
    NoMatch,
}

impl Classification {
    /// Convert to an option, dropping the no match case
    #[must_use]
    pub fn into_record(self) -> Option<CallRecord> {
        match self {
            Self::Record(r) => Some(r),
            Self::NoMatch => None,
        }
    }
}

/// Ordered table of compiled patterns
#[derive(Debug, Clone)]
pub struct Classifier {
    patterns: Vec<(CallKind, Regex)>,
}

impl Classifier {
    /// Compile an ordered pattern table.
    ///
    /// Patterns are anchored at line start.
    pub fn new<'a, I>(patterns: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = (CallKind, &'a str)>,
    {
        let patterns = patterns
            .into_iter()
            .map(|(kind, pattern)| {
                let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
                    ClassifierError::InvalidPattern {
                        kind,
                        pattern: pattern.to_owned(),
                        source,
                    }
                })?;
                // Group 0 is the whole match
                let groups = regex.captures_len() - 1;
                if groups < MIN_GROUPS {
                    return Err(ClassifierError::TooFewGroups {
                        kind,
                        pattern: pattern.to_owned(),
                        groups,
                    });
                }
                Ok((kind, regex))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Classify a single line of ltrace output
    #[must_use]
    pub fn classify(&self, line: &str) -> Classification {
        let Some((kind, caps)) = self
            .patterns
            .iter()
            .find_map(|(kind, regex)| regex.captures(line).map(|caps| (*kind, caps)))
        else {
            return Classification::NoMatch;
        };

        let field = |i: usize| caps.get(i).map(|m| m.as_str());
        let pid = field(1).unwrap_or_default();
        if pid.is_empty() {
            return Classification::NoMatch;
        }
        let name = field(2).unwrap_or_default();
        let name = name
            .split_once(CALLER_SEP)
            .map_or(name, |(_caller, callee)| callee)
            .trim();
        let args = field(3).unwrap_or_default();
        let ret_val = field(4);

        match Call::from_fields(
            kind,
            name.to_owned(),
            args.to_owned(),
            ret_val.map(ToOwned::to_owned),
        ) {
            Some(call) => Classification::Record(CallRecord {
                pid: pid.to_owned(),
                call,
            }),
            None => {
                log::debug!("{kind} line without return value: {line:?}");
                Classification::NoMatch
            }
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(line: &str) -> CallRecord {
        DEFAULT_CLASSIFIER
            .classify(line)
            .into_record()
            .unwrap_or_else(|| panic!("No match for {line:?}"))
    }

    #[test]
    fn function_call() {
        let r = record("123 foo(1, 2) = 3");
        assert_eq!(r.pid, "123");
        assert_eq!(
            r.call,
            Call::Function {
                name: "foo".to_owned(),
                args: "1, 2".to_owned(),
                ret_val: "3".to_owned(),
            }
        );

        let r = record(
            "4242   malloc(32)                                   = 0x55d8c5a4b2a0",
        );
        assert_eq!(r.call.name(), "malloc");
        assert_eq!(r.call.args(), "32");
        assert_eq!(r.call.ret_val(), Some("0x55d8c5a4b2a0"));
    }

    #[test]
    fn function_call_nested_parens() {
        let r = record(r#"77 printf("%d (%s)\n", 3, "x") = 8"#);
        assert_eq!(r.call.name(), "printf");
        assert_eq!(r.call.args(), r#""%d (%s)\n", 3, "x""#);
        assert_eq!(r.call.ret_val(), Some("8"));
    }

    #[test]
    fn caller_prefix() {
        let r = record("123 prog->malloc(5) = 0x1000");
        assert_eq!(r.call.name(), "malloc");
        assert_eq!(r.call.kind(), CallKind::FunctionCall);

        // Only the first separator is considered
        let r = record("123 <... a->b->c resumed> ) = 1");
        assert_eq!(r.call.name(), "b->c");

        let r = record("123 <... foo -> bar(1,2) resumed> ) = 3");
        assert_eq!(r.call.name(), "bar(1,2)");
    }

    #[test]
    fn resumed() {
        let r = record("2001 <... wait resumed> 0x7ffd4c1c)                = 2002");
        assert_eq!(r.pid, "2001");
        assert_eq!(r.call.kind(), CallKind::Resumed);
        assert_eq!(r.call.name(), "wait");
        assert_eq!(r.call.args().trim(), "0x7ffd4c1c)");
        assert_eq!(r.call.ret_val(), Some("2002"));

        let r = record("2001 <... read resumed> \"\", 10) = -1");
        assert_eq!(r.call.ret_val(), Some("-1"));
    }

    #[test]
    fn unfinished() {
        let r = record("2001 wait(0x7ffd4c1c <unfinished ...>");
        assert_eq!(
            r.call,
            Call::Unfinished {
                name: "wait".to_owned(),
                args: "0x7ffd4c1c ".to_owned(),
            }
        );
        assert_eq!(r.call.ret_val(), None);
    }

    #[test]
    fn no_return() {
        let r = record("2002 exit(1 <no return ...>");
        assert_eq!(
            r.call,
            Call::NoReturn {
                name: "exit".to_owned(),
                args: "1 ".to_owned(),
            }
        );
    }

    #[test]
    fn special() {
        let r = record("2002 +++ exited (status 1) +++");
        assert_eq!(
            r.call,
            Call::Special {
                event: "exited".to_owned(),
                detail: "status 1".to_owned(),
            }
        );

        let r = record("2001 --- SIGPIPE (Broken pipe) ---");
        assert_eq!(r.call.kind(), CallKind::Special);
        assert_eq!(r.call.name(), "SIGPIPE");
        assert_eq!(r.call.args(), "Broken pipe");
        assert_eq!(r.call.ret_val(), None);
    }

    #[test]
    fn no_match() {
        for line in [
            "",
            "Lorem ipsum dolor sit amet",
            "   ",
            "abc foo(1) = 2",
            "123 <... malloc resumed> ) = 0x55d8c5a4b2a0",
            // No parenthesis, so no exit status either
            "2001 +++ killed by SIGKILL +++",
        ] {
            assert_eq!(DEFAULT_CLASSIFIER.classify(line), Classification::NoMatch, "{line:?}");
        }
    }

    #[test]
    fn too_few_groups() {
        let err = Classifier::new([(CallKind::FunctionCall, r"([0-9]+) (.*)")]).unwrap_err();
        assert!(
            matches!(err, ClassifierError::TooFewGroups { groups: 2, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn invalid_pattern() {
        let err = Classifier::new([(CallKind::Special, r"([0-9]+")]).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidPattern { .. }), "{err:?}");
    }

    #[test]
    fn custom_table_missing_ret_val() {
        let classifier =
            Classifier::new([(CallKind::FunctionCall, r"([0-9]+) (\w+)\((.*)\)")]).unwrap();
        assert_eq!(classifier.classify("1 foo(2)"), Classification::NoMatch);

        let classifier =
            Classifier::new([(CallKind::Unfinished, r"([0-9]+) (\w+)\((.*)\)")]).unwrap();
        assert_eq!(
            classifier.classify("1 foo(2)").into_record().unwrap().call,
            Call::Unfinished {
                name: "foo".to_owned(),
                args: "2".to_owned(),
            }
        );
    }
}
