//! Hook handler values and descriptors
//!
//! Handlers are the private instance methods of a plugin class. Each one is
//! described by its name, its declared parameter types and an opaque callable
//! body. Values crossing the dispatch boundary are loosely typed
//! [`HookValue`]s; the declared [`ParamType`] of a parameter decides whether
//! an incoming value is passed through or replaced by [`HookValue::Null`].

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;

/// A loosely typed value passed to or returned from a hook handler
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HookValue {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Long(i64),
    /// Shared string
    Str(Arc<str>),
    /// Ordered list of values
    List(Vec<HookValue>),
}

impl HookValue {
    /// Build a string value
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        HookValue::Str(s.into())
    }

    /// Check if this value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, HookValue::Null)
    }

    /// Get the string contents if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HookValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer if this is a long
    pub fn as_long(&self) -> Option<i64> {
        match self {
            HookValue::Long(n) => Some(*n),
            _ => None,
        }
    }

    /// Name of the runtime type, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            HookValue::Null => "null",
            HookValue::Bool(_) => "bool",
            HookValue::Long(_) => "long",
            HookValue::Str(_) => "str",
            HookValue::List(_) => "list",
        }
    }
}

impl From<&str> for HookValue {
    fn from(s: &str) -> Self {
        HookValue::Str(s.into())
    }
}

impl From<String> for HookValue {
    fn from(s: String) -> Self {
        HookValue::Str(s.into())
    }
}

impl From<i64> for HookValue {
    fn from(n: i64) -> Self {
        HookValue::Long(n)
    }
}

impl From<bool> for HookValue {
    fn from(b: bool) -> Self {
        HookValue::Bool(b)
    }
}

impl fmt::Display for HookValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookValue::Null => write!(f, "null"),
            HookValue::Bool(b) => write!(f, "{}", b),
            HookValue::Long(n) => write!(f, "{}", n),
            HookValue::Str(s) => write!(f, "{:?}", s),
            HookValue::List(items) => write!(f, "[{}]", items.iter().join(", ")),
        }
    }
}

/// Declared type of a handler parameter
///
/// Each tag has a stable byte encoding so it can be carried as an
/// instruction immediate.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Accepts every value, including null
    Any = 0,
    Bool = 1,
    Long = 2,
    Str = 3,
    List = 4,
}

impl ParamType {
    /// Decode a type tag from its byte encoding
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ParamType::Any),
            1 => Some(ParamType::Bool),
            2 => Some(ParamType::Long),
            3 => Some(ParamType::Str),
            4 => Some(ParamType::List),
            _ => None,
        }
    }

    /// Encode this type tag as a byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Checked narrowing conversion.
    ///
    /// Returns the value unchanged when it is an instance of this type and
    /// `Null` otherwise. A mismatch is never an error.
    pub fn narrow(self, value: HookValue) -> HookValue {
        let accepted = match (self, &value) {
            (ParamType::Any, _) => true,
            (ParamType::Bool, HookValue::Bool(_)) => true,
            (ParamType::Long, HookValue::Long(_)) => true,
            (ParamType::Str, HookValue::Str(_)) => true,
            (ParamType::List, HookValue::List(_)) => true,
            _ => false,
        };
        if accepted {
            value
        } else {
            HookValue::Null
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Any => "any",
            ParamType::Bool => "bool",
            ParamType::Long => "long",
            ParamType::Str => "str",
            ParamType::List => "list",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Handler body signature.
///
/// Returning `None` means the handler produced no value.
pub type HandlerFn = Arc<dyn Fn(&[HookValue]) -> Option<HookValue> + Send + Sync>;

/// A named hook handler registered for dispatch
#[derive(Clone)]
pub struct HandlerDescriptor {
    name: Arc<str>,
    params: SmallVec<[ParamType; 4]>,
    body: HandlerFn,
}

impl HandlerDescriptor {
    /// Create a new descriptor
    pub fn new<F>(name: impl Into<Arc<str>>, params: &[ParamType], body: F) -> Self
    where
        F: Fn(&[HookValue]) -> Option<HookValue> + Send + Sync + 'static,
    {
        Self::from_fn(name, params, Arc::new(body))
    }

    /// Create a descriptor sharing an existing body
    pub fn from_fn(name: impl Into<Arc<str>>, params: &[ParamType], body: HandlerFn) -> Self {
        Self {
            name: name.into(),
            params: SmallVec::from_slice(params),
            body,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Invoke the handler body with already-marshalled arguments
    #[inline]
    pub fn invoke(&self, args: &[HookValue]) -> Option<HookValue> {
        (self.body)(args)
    }

    /// Human-readable signature, e.g. `OnMy(str, long)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params.iter().join(", "))
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Bind caller-supplied arguments positionally to declared parameters.
///
/// Missing arguments read as `Null`; wrong-typed arguments narrow to `Null`.
pub fn marshal_args(params: &[ParamType], args: &[HookValue]) -> SmallVec<[HookValue; 4]> {
    params
        .iter()
        .enumerate()
        .map(|(i, ty)| ty.narrow(args.get(i).cloned().unwrap_or_default()))
        .collect()
}
