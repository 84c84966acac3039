use std::error::Error;

// Error type enum
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Width mismatch, overlapping or duplicate binding, fan-in violation.
    Configuration,
    /// Unknown part type or undeclared pin.
    UnresolvedReference,
    /// A loop through combinational parts only.
    CyclicCombinational,
    IOError,
    Other,
}

impl ErrorKind {
    fn banner(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "CONFIGURATION ERROR",
            ErrorKind::UnresolvedReference => "UNRESOLVED REFERENCE",
            ErrorKind::CyclicCombinational => "COMBINATIONAL CYCLE",
            ErrorKind::IOError => "IO ERROR",
            ErrorKind::Other => "ERROR",
        }
    }
}

/// SimError should be used when generating an error that has no other
/// source error object. This is the start of the error propagation chain.
#[derive(Clone, PartialEq, Eq)]
pub struct SimError {
    pub msg: String,
    pub kind: ErrorKind,
}

impl SimError {
    pub fn configuration(msg: impl Into<String>) -> SimError {
        SimError {
            msg: msg.into(),
            kind: ErrorKind::Configuration,
        }
    }

    pub fn unresolved(msg: impl Into<String>) -> SimError {
        SimError {
            msg: msg.into(),
            kind: ErrorKind::UnresolvedReference,
        }
    }

    pub fn cyclic(msg: impl Into<String>) -> SimError {
        SimError {
            msg: msg.into(),
            kind: ErrorKind::CyclicCombinational,
        }
    }
}

/// Transformed errors should be used when the source of the error is
/// another error. This is propagating an error with a new message.
pub struct TransformedError {
    pub msg: String,
    pub kind: ErrorKind,
    pub source: Option<Box<dyn Error + 'static>>,
}

impl std::fmt::Debug for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::fmt::Debug for TransformedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// This relies on the SimError display implementation. It will print
/// the entire error chain.
impl std::fmt::Display for TransformedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SimError::from(self))?;
        match &self.source {
            Some(error_source) => writeln!(f, "{}", error_source),
            None => Ok(()),
        }
    }
}

/// Strips the source from a transformed error. This is used to
/// display a TransformedError.
impl From<&TransformedError> for SimError {
    fn from(e: &TransformedError) -> Self {
        SimError {
            msg: e.msg.clone(),
            kind: e.kind.clone(),
        }
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::Other => writeln!(f, "{}", self.msg),
            kind => {
                writeln!(f, "-- {} -----------", kind.banner())?;
                writeln!(f, "{}", self.msg)
            }
        }
    }
}

impl From<String> for SimError {
    fn from(e: String) -> Self {
        SimError {
            msg: e,
            kind: ErrorKind::Other,
        }
    }
}

impl Error for SimError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl Error for TransformedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.source {
            None => None,
            // We store the source as an Box to a trait object.
            // Dereference once to get the Box behind the self reference,
            // and dereference the second time to get the inner trait object.
            Some(e) => Some(&**e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_banner() {
        let e = SimError::cyclic("Combinational cycle through Not#0 -> Not#1.");
        let s = e.to_string();
        assert!(s.starts_with("-- COMBINATIONAL CYCLE"));
        assert!(s.contains("Not#0 -> Not#1"));
    }

    #[test]
    fn test_transformed_error_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let e = TransformedError {
            msg: String::from("Unable to read test script."),
            kind: ErrorKind::IOError,
            source: Some(Box::new(io)),
        };
        let s = e.to_string();
        assert!(s.contains("Unable to read test script."));
        assert!(s.contains("missing.json"));
        assert!(e.source().is_some());
    }
}
