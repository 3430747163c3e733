//! Dispatch arguments and the bound call handed to consumers.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use uuid::Uuid;

use crate::binder::{Binding, META_PARAM, RETURN_VALUE_PARAM};
use crate::error::ArgumentError;

/// A dispatched value. Shared, so consumers see the producer's values
/// (and anything behind a `Mutex` inside them) rather than copies.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wrap a value for dispatch.
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// The positional and named arguments of a producer call.
#[derive(Clone, Default)]
pub struct Arguments {
    positional: SmallVec<[Value; 4]>,
    named: SmallVec<[(String, Value); 4]>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Any + Send + Sync>(self, v: T) -> Self {
        self.arg_value(Arc::new(v))
    }

    pub fn arg_value(mut self, v: Value) -> Self {
        self.positional.push(v);
        self
    }

    /// Set a named argument, replacing any previous value for `name`.
    pub fn kwarg<T: Any + Send + Sync>(self, name: impl Into<String>, v: T) -> Self {
        self.kwarg_value(name, Arc::new(v))
    }

    pub fn kwarg_value(mut self, name: impl Into<String>, v: Value) -> Self {
        let name = name.into();
        match self.named.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = v,
            None => self.named.push((name, v)),
        }
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.named.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn named_value(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Typed view of the positional argument at `index`.
    pub fn positional_as<T: Any>(&self, index: usize) -> Option<&T> {
        self.positional.get(index)?.downcast_ref()
    }

    /// Typed view of the named argument `name`.
    pub fn named_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.named_value(name)?.downcast_ref()
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("positional", &self.positional.len())
            .field("named", &self.named.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

/// Per-dispatch metadata.
///
/// Passed only to consumers that declare a keyword-only
/// `side_effect_meta` parameter.
#[derive(Clone)]
pub struct SideEffectMeta {
    label: String,
    return_value: Option<Value>,
    args: Arguments,
    dispatch_id: Uuid,
}

impl SideEffectMeta {
    pub fn new(label: impl Into<String>, return_value: Option<Value>) -> Self {
        Self {
            label: label.into(),
            return_value,
            args: Arguments::default(),
            dispatch_id: Uuid::new_v4(),
        }
    }

    /// Attach the producer's arguments.
    pub fn with_args(mut self, args: Arguments) -> Self {
        self.args = args;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }

    /// The arguments the producer was called with.
    pub fn args(&self) -> &Arguments {
        &self.args
    }

    pub fn has_return_value(&self) -> bool {
        self.return_value.is_some()
    }

    pub fn return_value_raw(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    /// Typed view of the producer's return value.
    pub fn return_value<T: Any>(&self) -> Option<&T> {
        self.return_value.as_ref()?.downcast_ref()
    }
}

impl fmt::Debug for SideEffectMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectMeta")
            .field("label", &self.label)
            .field("has_return_value", &self.return_value.is_some())
            .field("args", &self.args)
            .field("dispatch_id", &self.dispatch_id)
            .finish()
    }
}

/// Arguments bound to one consumer's signature.
pub struct Call {
    label: String,
    params: SmallVec<[(String, Value); 4]>,
    var_args: SmallVec<[Value; 4]>,
    var_kwargs: SmallVec<[(String, Value); 4]>,
}

impl Call {
    pub(crate) fn new(label: impl Into<String>, binding: Binding) -> Self {
        Self {
            label: label.into(),
            params: binding.params,
            var_args: binding.var_args,
            var_kwargs: binding.var_kwargs,
        }
    }

    /// Label being dispatched; empty when the consumer was called directly.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a declared parameter received a value.
    pub fn is_bound(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n == name)
    }

    /// Typed value of a declared parameter.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T, ArgumentError> {
        self.get_opt(name)?.ok_or_else(|| ArgumentError::Missing {
            name: name.to_string(),
        })
    }

    /// Typed value of an optional parameter; `Ok(None)` when it was not passed.
    pub fn get_opt<T: Any>(&self, name: &str) -> Result<Option<&T>, ArgumentError> {
        match self.params.iter().find(|(n, _)| n == name) {
            Some((_, v)) => downcast(name, v).map(Some),
            None => Ok(None),
        }
    }

    /// Values collected by `*args`.
    pub fn var_args(&self) -> &[Value] {
        &self.var_args
    }

    pub fn var_arg<T: Any>(&self, index: usize) -> Result<&T, ArgumentError> {
        let name = format!("*args[{index}]");
        match self.var_args.get(index) {
            Some(v) => downcast(&name, v),
            None => Err(ArgumentError::Missing { name }),
        }
    }

    /// Names collected by `**kwargs`, in dispatch order.
    pub fn var_kwarg_names(&self) -> impl Iterator<Item = &str> {
        self.var_kwargs.iter().map(|(n, _)| n.as_str())
    }

    pub fn var_kwarg<T: Any>(&self, name: &str) -> Result<&T, ArgumentError> {
        match self.var_kwargs.iter().find(|(n, _)| n == name) {
            Some((_, v)) => downcast(name, v),
            None => Err(ArgumentError::Missing {
                name: name.to_string(),
            }),
        }
    }

    /// Dispatch metadata, if the consumer asked for it.
    pub fn meta(&self) -> Option<&SideEffectMeta> {
        self.get::<SideEffectMeta>(META_PARAM).ok()
    }

    /// Producer return value, if the consumer asked for it (as a
    /// `return_value` parameter, through `**kwargs`, or via the metadata).
    pub fn return_value<T: Any>(&self) -> Option<&T> {
        let raw = self
            .params
            .iter()
            .chain(self.var_kwargs.iter())
            .find(|(n, _)| n == RETURN_VALUE_PARAM)
            .map(|(_, v)| v);
        match raw {
            Some(v) => v.downcast_ref(),
            None => self.meta()?.return_value(),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("label", &self.label)
            .field("params", &self.params.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("var_args", &self.var_args.len())
            .field(
                "var_kwargs",
                &self.var_kwargs.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn downcast<'a, T: Any>(name: &str, v: &'a Value) -> Result<&'a T, ArgumentError> {
    v.downcast_ref().ok_or_else(|| ArgumentError::WrongType {
        name: name.to_string(),
        expected: type_name::<T>(),
    })
}
