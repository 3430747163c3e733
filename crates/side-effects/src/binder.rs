//! Declared consumer signatures and argument binding.
//!
//! Consumers declare their parameters up front with a [`Signature`]. At
//! dispatch time the registry binds the producer's arguments against that
//! declaration without calling the consumer, so an incompatible consumer is
//! caught before anything runs.
//!
//! Binding rules mirror keyword-capable call semantics:
//!
//! ```text
//! (a, b=.., *args, *, k, **kwargs)
//!  │  │      │        │     └─ unknown names collect here, else error
//!  │  │      │        └─ keyword-only: bound by name only
//!  │  │      └─ extra positionals collect here, else error
//!  └──┴─ positional-or-keyword: filled in order, then by name
//! ```

use std::borrow::Cow;
use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::arguments::{Arguments, SideEffectMeta, Value};

/// Keyword-only parameter name that receives [`SideEffectMeta`].
pub const META_PARAM: &str = "side_effect_meta";

/// Parameter name that receives the producer's return value.
pub const RETURN_VALUE_PARAM: &str = "return_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Bound positionally or by name.
    Positional,
    /// `*args`
    VarPositional,
    /// Bound by name only.
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: Cow<'static, str>,
    kind: ParameterKind,
    required: bool,
}

impl Parameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// The declared parameter set of a consumer.
///
/// Parameters are kept in canonical order regardless of builder call
/// order: positional, `*args`, keyword-only, `**kwargs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    positional: SmallVec<[Parameter; 4]>,
    var_positional: Option<Parameter>,
    keyword_only: SmallVec<[Parameter; 2]>,
    var_keyword: Option<Parameter>,
}

impl Signature {
    /// A signature with no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Required positional-or-keyword parameter.
    ///
    /// Must come before any [`optional`](Self::optional) parameter.
    pub fn arg(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        let name = self.checked_name(name);
        debug_assert!(
            self.positional.iter().all(|p| p.required),
            "required parameter `{name}` follows a parameter with a default"
        );
        self.positional
            .push(param(name, ParameterKind::Positional, true));
        self
    }

    /// Positional-or-keyword parameter with a default.
    pub fn optional(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        let name = self.checked_name(name);
        self.positional
            .push(param(name, ParameterKind::Positional, false));
        self
    }

    /// Accept any number of extra positional arguments.
    pub fn var_args(mut self) -> Self {
        self.var_positional = Some(param("args", ParameterKind::VarPositional, false));
        self
    }

    /// Required keyword-only parameter.
    pub fn keyword_only(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        let name = self.checked_name(name);
        self.keyword_only
            .push(param(name, ParameterKind::KeywordOnly, true));
        self
    }

    /// Keyword-only parameter with a default.
    pub fn keyword_only_optional(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        let name = self.checked_name(name);
        self.keyword_only
            .push(param(name, ParameterKind::KeywordOnly, false));
        self
    }

    /// Accept any extra named arguments.
    pub fn var_kwargs(mut self) -> Self {
        self.var_keyword = Some(param("kwargs", ParameterKind::VarKeyword, false));
        self
    }

    /// Declare the keyword-only `side_effect_meta` parameter.
    pub fn with_meta(self) -> Self {
        self.keyword_only(META_PARAM)
    }

    fn checked_name(&self, name: impl Into<Cow<'static, str>>) -> Cow<'static, str> {
        let name = name.into();
        debug_assert!(
            !self.parameters().any(|p| p.name == name),
            "duplicate parameter `{name}`"
        );
        name
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.positional
            .iter()
            .chain(self.var_positional.iter())
            .chain(self.keyword_only.iter())
            .chain(self.var_keyword.iter())
    }

    pub fn accepts_var_args(&self) -> bool {
        self.var_positional.is_some()
    }

    pub fn accepts_var_kwargs(&self) -> bool {
        self.var_keyword.is_some()
    }

    /// Whether `side_effect_meta` is declared keyword-only.
    pub fn wants_meta(&self) -> bool {
        self.keyword_only.iter().any(|p| p.name == META_PARAM)
    }

    /// The signature without the parameters the registry injects
    /// (`return_value`, `side_effect_meta`), used to compare consumers.
    pub fn trimmed(&self) -> Signature {
        let injected = |p: &&Parameter| p.name != RETURN_VALUE_PARAM && p.name != META_PARAM;
        Signature {
            positional: self.positional.iter().filter(injected).cloned().collect(),
            var_positional: self.var_positional.clone(),
            keyword_only: self.keyword_only.iter().filter(injected).cloned().collect(),
            var_keyword: self.var_keyword.clone(),
        }
    }

    /// Bind `args` against this signature.
    pub(crate) fn bind(&self, args: &Arguments) -> Result<Binding, BindError> {
        let mut binding = Binding::default();
        let given = args.positional();

        for (index, value) in given.iter().enumerate() {
            match self.positional.get(index) {
                Some(p) => binding.params.push((p.name.to_string(), value.clone())),
                None if self.var_positional.is_some() => binding.var_args.push(value.clone()),
                None => {
                    return Err(BindError::TooManyPositional {
                        expected: self.positional.len(),
                        given: given.len(),
                    })
                }
            }
        }

        for (name, value) in args.named() {
            if let Some(index) = self.positional.iter().position(|p| p.name == name) {
                if index < given.len() {
                    return Err(BindError::MultipleValues(name.to_string()));
                }
                binding.params.push((name.to_string(), value.clone()));
            } else if self.keyword_only.iter().any(|p| p.name == name) {
                binding.params.push((name.to_string(), value.clone()));
            } else if self.var_keyword.is_some() {
                binding.var_kwargs.push((name.to_string(), value.clone()));
            } else {
                return Err(BindError::Unexpected(name.to_string()));
            }
        }

        let missing = self
            .positional
            .iter()
            .chain(self.keyword_only.iter())
            .find(|p| p.required && !binding.params.iter().any(|(n, _)| *n == p.name));
        if let Some(p) = missing {
            return Err(BindError::Missing(p.name.to_string()));
        }

        Ok(binding)
    }

    /// Bind for a dispatch, injecting the metadata or the return value
    /// when the signature asks for them.
    ///
    /// Tried in order: keyword-only `side_effect_meta`, then that plus a
    /// `return_value` keyword, then `return_value` alone, then the plain
    /// arguments. The first that binds wins.
    pub(crate) fn bind_dispatch(
        &self,
        args: &Arguments,
        meta: &SideEffectMeta,
    ) -> Result<Binding, BindError> {
        let return_value: Value = match meta.return_value_raw() {
            Some(v) => v.clone(),
            None => crate::arguments::value(()),
        };

        if self.wants_meta() {
            let with_meta = args.clone().kwarg(META_PARAM, meta.clone());
            if let Ok(binding) = self.bind(&with_meta) {
                return Ok(binding);
            }
            // A declared `return_value` alongside the metadata gets both.
            let with_both = with_meta.kwarg_value(RETURN_VALUE_PARAM, return_value.clone());
            if let Ok(binding) = self.bind(&with_both) {
                return Ok(binding);
            }
        }

        let with_return = args.clone().kwarg_value(RETURN_VALUE_PARAM, return_value);
        if let Ok(binding) = self.bind(&with_return) {
            return Ok(binding);
        }

        self.bind(args)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .positional
            .iter()
            .map(|p| {
                if p.required {
                    p.name.to_string()
                } else {
                    format!("{}=..", p.name)
                }
            })
            .collect();
        match &self.var_positional {
            Some(p) => parts.push(format!("*{}", p.name)),
            None if !self.keyword_only.is_empty() => parts.push("*".to_string()),
            None => {}
        }
        parts.extend(self.keyword_only.iter().map(|p| {
            if p.required {
                p.name.to_string()
            } else {
                format!("{}=..", p.name)
            }
        }));
        if let Some(p) = &self.var_keyword {
            parts.push(format!("**{}", p.name));
        }
        write!(f, "({})", parts.join(", "))
    }
}

fn param(name: impl Into<Cow<'static, str>>, kind: ParameterKind, required: bool) -> Parameter {
    Parameter {
        name: name.into(),
        kind,
        required,
    }
}

/// Values assigned to a signature's parameters.
#[derive(Default)]
pub(crate) struct Binding {
    pub(crate) params: SmallVec<[(String, Value); 4]>,
    pub(crate) var_args: SmallVec<[Value; 4]>,
    pub(crate) var_kwargs: SmallVec<[(String, Value); 4]>,
}

/// Why arguments could not be bound.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("takes {expected} positional arguments but {given} were given")]
    TooManyPositional { expected: usize, given: usize },

    #[error("got multiple values for argument '{0}'")]
    MultipleValues(String),

    #[error("got an unexpected keyword argument '{0}'")]
    Unexpected(String),

    #[error("missing a required argument: '{0}'")]
    Missing(String),
}

/// Whether `args` can be bound to `signature`, without calling anything.
pub fn try_bind(signature: &Signature, args: &Arguments) -> bool {
    signature.bind(args).is_ok()
}
