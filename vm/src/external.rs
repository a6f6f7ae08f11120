//! External (host) functions.
//!
//! Hosts bind closures by name; an external-call divert marshals its
//! arguments off the evaluation stack into host primitives, invokes the
//! closure, and pushes the marshalled return value. An unbound name falls
//! back to a same-named story function when one exists.

use std::collections::BTreeMap;

use skein_types::Value;

use crate::error::StoryError;

/// A value crossing the host boundary, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// No value (maps to Void inside the story).
    None,
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Text.
    Str(String),
}

impl HostValue {
    /// Marshal a runtime value out to the host.
    ///
    /// # Errors
    ///
    /// Lists, divert targets, and variable pointers do not cross the
    /// boundary.
    pub fn from_value(value: &Value) -> Result<Self, StoryError> {
        Ok(match value {
            Value::Void => Self::None,
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::Bool(b) => Self::Bool(*b),
            Value::Str(s) => Self::Str(s.clone()),
            other => return Err(StoryError::Unmarshalable(other.kind())),
        })
    }

    /// Marshal a host value back into the story.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::None => Value::Void,
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
            Self::Bool(b) => Value::Bool(b),
            Self::Str(s) => Value::Str(s),
        }
    }
}

/// A bound host function.
pub type ExternalFunction = Box<dyn FnMut(&[HostValue]) -> Result<HostValue, String>>;

/// The name → closure registry of one story.
#[derive(Default)]
pub struct ExternalFunctions {
    bound: BTreeMap<String, ExternalFunction>,
}

impl ExternalFunctions {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a closure under a name.
    ///
    /// # Errors
    ///
    /// Binding the same name twice is an error.
    pub fn bind(&mut self, name: &str, function: ExternalFunction) -> Result<(), StoryError> {
        if self.bound.contains_key(name) {
            return Err(StoryError::AlreadyBound(name.to_string()));
        }
        self.bound.insert(name.to_string(), function);
        Ok(())
    }

    /// Remove a binding; unknown names are ignored.
    pub fn unbind(&mut self, name: &str) {
        self.bound.remove(name);
    }

    /// Whether a name is bound.
    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.bound.contains_key(name)
    }

    /// Invoke a bound function.
    ///
    /// # Errors
    ///
    /// Unbound names and host-reported failures are runtime errors.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue, StoryError> {
        let function = self
            .bound
            .get_mut(name)
            .ok_or_else(|| StoryError::UnboundExternal(name.to_string()))?;
        function(args).map_err(|message| StoryError::ExternalFailed {
            name: name.to_string(),
            message,
        })
    }
}

impl std::fmt::Debug for ExternalFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalFunctions")
            .field("bound", &self.bound.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_binding_is_an_error() {
        let mut fns = ExternalFunctions::new();
        fns.bind("beep", Box::new(|_| Ok(HostValue::None))).unwrap();
        assert!(matches!(
            fns.bind("beep", Box::new(|_| Ok(HostValue::None))),
            Err(StoryError::AlreadyBound(_))
        ));
        fns.unbind("beep");
        assert!(fns.bind("beep", Box::new(|_| Ok(HostValue::None))).is_ok());
    }

    #[test]
    fn calls_marshal_arguments_and_results() {
        let mut fns = ExternalFunctions::new();
        fns.bind(
            "sum",
            Box::new(|args| {
                let total = args
                    .iter()
                    .map(|a| match a {
                        HostValue::Int(i) => *i,
                        _ => 0,
                    })
                    .sum();
                Ok(HostValue::Int(total))
            }),
        )
        .unwrap();

        let result = fns
            .call("sum", &[HostValue::Int(2), HostValue::Int(3)])
            .unwrap();
        assert_eq!(result, HostValue::Int(5));
    }

    #[test]
    fn host_failures_surface_with_the_name() {
        let mut fns = ExternalFunctions::new();
        fns.bind("boom", Box::new(|_| Err("kaput".to_string())))
            .unwrap();
        assert!(matches!(
            fns.call("boom", &[]),
            Err(StoryError::ExternalFailed { name, message })
                if name == "boom" && message == "kaput"
        ));
        assert!(matches!(
            fns.call("ghost", &[]),
            Err(StoryError::UnboundExternal(_))
        ));
    }

    #[test]
    fn marshalling_round_trip() {
        for value in [
            Value::Int(1),
            Value::Float(2.5),
            Value::Bool(true),
            Value::Str("s".into()),
            Value::Void,
        ] {
            let host = HostValue::from_value(&value).unwrap();
            assert_eq!(host.into_value(), value);
        }
        assert!(HostValue::from_value(&Value::DivertTarget(
            skein_types::Path::from_str("x")
        ))
        .is_err());
    }
}
