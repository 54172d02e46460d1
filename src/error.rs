//! Error types for content stream interpretation and rewriting.

use thiserror::Error;

/// A recognized operator whose operands do not fit its signature.
///
/// Recoverable: the interpreter consults the handler's policy and by default
/// skips the operator's state effect and keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed operator `{operator}` at token {index}: {reason}")]
pub struct MalformedOperator {
    pub operator: String,
    /// Position of the token in the stream being interpreted.
    pub index: usize,
    pub reason: String,
}

/// Failure writing to or closing an output sink. Fatal for the page.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode content: {0}")]
    Encode(#[from] lopdf::Error),

    #[error("sink {0} is already closed")]
    Closed(usize),

    #[error("no sink at index {0}")]
    NoSuchSink(usize),
}

#[derive(Error, Debug)]
pub enum InterpretError {
    #[error(transparent)]
    Malformed(#[from] MalformedOperator),

    #[error("sink failure at operator `{operator}`: {source}")]
    Sink {
        operator: String,
        #[source]
        source: SinkError,
    },

    /// Failure outside any operator: prologue, epilogue or closing the sinks.
    #[error("sink failure: {0}")]
    Output(#[from] SinkError),

    #[error("form XObject nesting exceeds {0} levels")]
    FormDepth(usize),
}

impl InterpretError {
    /// Name of the operator being processed when the error occurred, if any.
    pub fn operator(&self) -> Option<&str> {
        match self {
            InterpretError::Malformed(m) => Some(&m.operator),
            InterpretError::Sink { operator, .. } => Some(operator),
            InterpretError::Output(_) => None,
            InterpretError::FormDepth(_) => Some("Do"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("page {0} not found")]
    PageNotFound(u32),

    #[error("page {page} could not be processed{}: {source}", operator_suffix(.operator))]
    Page {
        page: u32,
        operator: Option<String>,
        #[source]
        source: InterpretError,
    },

    #[error("page {page}: {source}")]
    Output {
        page: u32,
        #[source]
        source: SinkError,
    },
}

fn operator_suffix(operator: &Option<String>) -> String {
    operator
        .as_ref()
        .map(|o| format!(" at operator `{o}`"))
        .unwrap_or_default()
}

impl EditError {
    pub(crate) fn page(page: u32, source: InterpretError) -> Self {
        EditError::Page {
            page,
            operator: source.operator().map(str::to_owned),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EditError>;
