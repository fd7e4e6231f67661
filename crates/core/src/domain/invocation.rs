// Invocation - the work an entry performs once it becomes due

use serde::{Deserialize, Serialize};
use std::fmt;

/// Description of a call to make when the entry is processed.
///
/// The persistor never looks inside an invocation; it only hands it to the
/// configured [`InvocationSerializer`](crate::port::InvocationSerializer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Logical receiver of the call (service or handler name)
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub parameter_types: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl Invocation {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            arguments: Vec::new(),
        }
    }

    /// Append an argument together with its declared parameter type
    pub fn with_argument(
        mut self,
        parameter_type: impl Into<String>,
        argument: serde_json::Value,
    ) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.arguments.push(argument);
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.target, self.method)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}
