use super::VerifierErrorKind;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// Something worth telling the user about a method body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Index of the instruction (in the order they were pushed) the problem was found at.
    /// `None` for problems about the method as a whole.
    pub position: Option<usize>,

    pub kind: VerifierErrorKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.position {
            Some(position) => write!(f, "{} at instruction {}: {:?}", severity, position, self.kind),
            None => write!(f, "{}: {:?}", severity, self.kind),
        }
    }
}

/// Collects diagnostics for one method
///
/// Everything reported is also logged, so a caller that only wants a pass/fail answer can rely
/// on `has_errors` and let the logger show the rest.
#[derive(Default, Debug)]
pub struct Diagnostics {
    position: Option<usize>,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    /// Set the instruction position attached to subsequent reports
    pub fn set_position(&mut self, position: Option<usize>) {
        self.position = position;
    }

    pub fn error(&mut self, kind: VerifierErrorKind) {
        self.report(Severity::Error, kind)
    }

    pub fn warning(&mut self, kind: VerifierErrorKind) {
        self.report(Severity::Warning, kind)
    }

    fn report(&mut self, severity: Severity, kind: VerifierErrorKind) {
        let diagnostic = Diagnostic {
            severity,
            position: self.position,
            kind,
        };
        match severity {
            Severity::Error => log::error!("{}", diagnostic),
            Severity::Warning => log::warn!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
