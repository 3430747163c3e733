//! Consumer functions and their declared metadata.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::arguments::{Arguments, Call};
use crate::binder::Signature;

/// The callable part of a consumer.
pub type Handler = dyn Fn(&Call) -> anyhow::Result<()> + Send + Sync;

/// A function registered to run when its label is dispatched.
///
/// Identity is the qualified name: two consumers with the same name are
/// the same consumer as far as registration is concerned.
#[derive(Clone)]
pub struct Consumer {
    name: Cow<'static, str>,
    signature: Signature,
    doc: Option<Cow<'static, str>>,
    handler: Arc<Handler>,
}

impl Consumer {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, signature: Signature, handler: F) -> Self
    where
        F: Fn(&Call) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            doc: None,
            handler: Arc::new(handler),
        }
    }

    /// Attach documentation, shown by the diagnostic listing.
    pub fn with_doc(mut self, doc: impl Into<Cow<'static, str>>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Qualified name, e.g. `app::emails::send_welcome`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Documentation split into trimmed lines; `None` when there is none.
    pub fn docstring(&self) -> Option<Vec<String>> {
        let doc = self.doc.as_deref()?.trim();
        if doc.is_empty() {
            return None;
        }
        Some(doc.lines().map(|line| line.trim().to_string()).collect())
    }

    /// Run the handler with an already bound call.
    pub fn call(&self, call: &Call) -> anyhow::Result<()> {
        (self.handler)(call)
    }

    /// Call the consumer directly, outside of any dispatch.
    pub fn invoke(&self, args: &Arguments) -> anyhow::Result<()> {
        let binding = self.signature.bind(args).map_err(|e| {
            anyhow::anyhow!("{}{}: {e}", self.name, self.signature)
        })?;
        self.call(&Call::new("", binding))
    }
}

impl PartialEq for Consumer {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Consumer {}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .finish()
    }
}
