//! Error types and reporting

use crate::ast::{SourceLocation, Span};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Errors raised before or while building verification conditions.
///
/// Resolution errors are fatal for the run. `IllFormedContract` and
/// `GhostViolation` only fail the declaration they belong to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("Lexer error at {span}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Parser error at {span}: {message}")]
    Parser { message: String, span: Span },

    #[error("IO error: {path}: {message}")]
    Io { path: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{location}: duplicate declaration of `{name}` (first declared at {previous})")]
    DuplicateDeclaration {
        name: String,
        location: SourceLocation,
        previous: SourceLocation,
    },

    #[error("{location}: unresolved name `{name}`{}", hint_suffix(.hint))]
    UnresolvedName {
        name: String,
        location: SourceLocation,
        hint: Option<String>,
    },

    #[error("{location}: ambiguous name `{name}`, candidates: {}", .candidates.join(", "))]
    AmbiguousName {
        name: String,
        location: SourceLocation,
        candidates: Vec<String>,
    },

    #[error("{location}: unknown package alias `{alias}`")]
    UnknownPackageAlias {
        alias: String,
        location: SourceLocation,
    },

    #[error("{location}: type mismatch: {message}")]
    TypeMismatch { message: String, location: SourceLocation },

    #[error("{location}: ill-formed contract of `{decl}`: {message}")]
    IllFormedContract {
        decl: String,
        message: String,
        location: SourceLocation,
    },

    #[error("{location}: ghost violation in `{decl}`: {message}")]
    GhostViolation {
        decl: String,
        message: String,
        location: SourceLocation,
    },

    #[error("{location}: cannot verify `{decl}`: {message}")]
    Unsupported {
        decl: String,
        message: String,
        location: SourceLocation,
    },
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" ({hint})"),
        None => String::new(),
    }
}

impl VerifyError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::Parser {
            message: message.into(),
            span,
        }
    }

    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unresolved(name: impl Into<String>, location: SourceLocation, hint: Option<String>) -> Self {
        Self::UnresolvedName {
            name: name.into(),
            location,
            hint,
        }
    }

    pub fn type_mismatch(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::TypeMismatch {
            message: message.into(),
            location,
        }
    }

    pub fn ill_formed(decl: impl Into<String>, message: impl Into<String>, location: SourceLocation) -> Self {
        Self::IllFormedContract {
            decl: decl.into(),
            message: message.into(),
            location,
        }
    }

    pub fn ghost_violation(decl: impl Into<String>, message: impl Into<String>, location: SourceLocation) -> Self {
        Self::GhostViolation {
            decl: decl.into(),
            message: message.into(),
            location,
        }
    }

    pub fn unsupported(decl: impl Into<String>, message: impl Into<String>, location: SourceLocation) -> Self {
        Self::Unsupported {
            decl: decl.into(),
            message: message.into(),
            location,
        }
    }

    /// Source location for semantic errors.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::DuplicateDeclaration { location, .. }
            | Self::UnresolvedName { location, .. }
            | Self::AmbiguousName { location, .. }
            | Self::UnknownPackageAlias { location, .. }
            | Self::TypeMismatch { location, .. }
            | Self::IllFormedContract { location, .. }
            | Self::GhostViolation { location, .. }
            | Self::Unsupported { location, .. } => Some(location),
            Self::Lexer { .. } | Self::Parser { .. } | Self::Io { .. } | Self::Config { .. } => None,
        }
    }

    /// Byte span inside the offending file, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. } | Self::Parser { span, .. } => Some(*span),
            other => other.location().map(|loc| loc.span),
        }
    }

    /// Declaration a declaration-local error belongs to.
    pub fn declaration(&self) -> Option<&str> {
        match self {
            Self::IllFormedContract { decl, .. } | Self::GhostViolation { decl, .. } | Self::Unsupported { decl, .. } => {
                Some(decl)
            }
            _ => None,
        }
    }

    /// Name resolution and typing errors
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedName { .. }
                | Self::AmbiguousName { .. }
                | Self::UnknownPackageAlias { .. }
                | Self::TypeMismatch { .. }
        )
    }

    /// Errors that fail a single declaration rather than the whole run.
    pub fn is_declaration_local(&self) -> bool {
        matches!(
            self,
            Self::IllFormedContract { .. } | Self::GhostViolation { .. } | Self::Unsupported { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lexer { .. } => "Lexer",
            Self::Parser { .. } => "Parser",
            Self::Io { .. } => "IO",
            Self::Config { .. } => "Config",
            Self::DuplicateDeclaration { .. } => "DuplicateDeclaration",
            Self::UnresolvedName { .. } => "UnresolvedName",
            Self::AmbiguousName { .. } => "AmbiguousName",
            Self::UnknownPackageAlias { .. } => "UnknownPackageAlias",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::IllFormedContract { .. } => "IllFormedContract",
            Self::GhostViolation { .. } => "GhostViolation",
            Self::Unsupported { .. } => "Unsupported",
        }
    }

    /// Message without the location prefix, for labels.
    pub fn message(&self) -> String {
        match self {
            Self::Lexer { message, .. }
            | Self::Parser { message, .. }
            | Self::Config { message } => message.clone(),
            Self::Io { path, message } => format!("{path}: {message}"),
            Self::DuplicateDeclaration { name, previous, .. } => {
                format!("duplicate declaration of `{name}` (first declared at {previous})")
            }
            Self::UnresolvedName { name, hint, .. } => {
                format!("unresolved name `{name}`{}", hint_suffix(hint))
            }
            Self::AmbiguousName { name, candidates, .. } => {
                format!("ambiguous name `{name}`, candidates: {}", candidates.join(", "))
            }
            Self::UnknownPackageAlias { alias, .. } => format!("unknown package alias `{alias}`"),
            Self::TypeMismatch { message, .. } => format!("type mismatch: {message}"),
            Self::IllFormedContract { message, .. }
            | Self::GhostViolation { message, .. }
            | Self::Unsupported { message, .. } => message.clone(),
        }
    }
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &VerifyError) -> std::io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    match error.span() {
        Some(span) => Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{} error", error.kind()))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((filename, Source::from(source))),
        None => Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{} error: {}", error.kind(), error.message()))
            .finish()
            .eprint((filename, Source::from(source))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LineIndex;

    fn loc(line_src: &str, start: usize, end: usize) -> SourceLocation {
        SourceLocation::new("main.go", &LineIndex::new(line_src), Span::new(start, end))
    }

    #[test]
    fn test_unresolved_display_includes_hint() {
        let err = VerifyError::unresolved("Aera", loc("x.Aera()", 2, 6), Some("did you mean `Area`?".into()));
        assert_eq!(
            err.to_string(),
            "main.go:1:3: unresolved name `Aera` (did you mean `Area`?)"
        );
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = VerifyError::AmbiguousName {
            name: "Rectangle".into(),
            location: loc("Rectangle", 0, 9),
            candidates: vec!["a.Rectangle".into(), "b.Rectangle".into()],
        };
        assert!(err.message().contains("a.Rectangle, b.Rectangle"));
        assert_eq!(err.kind(), "AmbiguousName");
    }

    #[test]
    fn test_declaration_local_errors() {
        let err = VerifyError::ill_formed("f", "old in precondition", loc("f", 0, 1));
        assert!(err.is_declaration_local());
        assert!(!VerifyError::config("bad").is_declaration_local());
    }

    #[test]
    fn test_span_of_front_door_errors() {
        let err = VerifyError::parser("expected `}`", Span::new(4, 5));
        assert_eq!(err.span(), Some(Span::new(4, 5)));
        assert!(err.location().is_none());
    }
}
