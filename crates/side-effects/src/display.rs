//! Listing registered side-effects for humans and CI.
//!
//! A [`Listing`] is a filtered, optionally sorted view of the registry with
//! three projections: raw (label → qualified names), summary (first doc
//! line per consumer) and verbose (full docs). Consumers without docs are
//! collected so a strict CI run can fail with
//! [`exit_code`](Listing::exit_code).

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::consumer::Consumer;
use crate::registry::Registry;

/// Label → consumers, sorted by label.
pub type Events = BTreeMap<String, Vec<Consumer>>;

/// Which labels to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Label(String),
    LabelContains(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// First doc line per consumer.
    #[default]
    Summary,
    /// Full docs per consumer.
    Verbose,
    /// JSON object of label → qualified names.
    Raw,
}

/// Sort labels ascending and each label's consumers by `key`.
pub fn sort_events<K, F>(events: Events, key: F) -> Events
where
    K: Ord,
    F: Fn(&Consumer) -> K,
{
    events
        .into_iter()
        .map(|(label, mut consumers)| {
            consumers.sort_by_key(|c| key(c));
            (label, consumers)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Listing {
    title: String,
    events: Events,
}

impl Listing {
    pub fn new(registry: &Registry, filter: &Filter) -> Self {
        match filter {
            Filter::All => Self::from_events("Registered side-effects:", registry.snapshot()),
            Filter::Label(label) => Self::from_events(
                format!("Side-effects for event matching '{label}':"),
                registry.by_label(label),
            ),
            Filter::LabelContains(value) => Self::from_events(
                format!("Side-effects for events matching '*{value}*':"),
                registry.by_label_contains(value),
            ),
        }
    }

    pub fn from_events(title: impl Into<String>, events: Events) -> Self {
        Self {
            title: title.into(),
            events,
        }
    }

    pub fn sorted_by<K, F>(self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&Consumer) -> K,
    {
        Self {
            title: self.title,
            events: sort_events(self.events, key),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    /// Label → qualified consumer names.
    pub fn raw(&self) -> BTreeMap<String, Vec<String>> {
        self.events
            .iter()
            .map(|(label, consumers)| {
                let names = consumers.iter().map(|c| c.name().to_string()).collect();
                (label.clone(), names)
            })
            .collect()
    }

    pub fn raw_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.raw())
    }

    /// Label → first doc line per consumer (`None` when undocumented).
    pub fn summaries(&self) -> BTreeMap<String, Vec<Option<String>>> {
        self.project(|c| c.docstring().and_then(|lines| lines.into_iter().next()))
    }

    /// Label → full doc lines per consumer (`None` when undocumented).
    pub fn docs(&self) -> BTreeMap<String, Vec<Option<Vec<String>>>> {
        self.project(Consumer::docstring)
    }

    fn project<T>(&self, f: impl Fn(&Consumer) -> T) -> BTreeMap<String, Vec<T>> {
        self.events
            .iter()
            .map(|(label, consumers)| (label.clone(), consumers.iter().map(&f).collect()))
            .collect()
    }

    /// Qualified names of listed consumers without docs, in listing order.
    pub fn missing_docstrings(&self) -> Vec<String> {
        self.events
            .values()
            .flatten()
            .filter(|c| c.docstring().is_none())
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Process exit code: the number of undocumented consumers when
    /// `strict`, otherwise 0.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict {
            i32::try_from(self.missing_docstrings().len()).unwrap_or(i32::MAX)
        } else {
            0
        }
    }

    /// Write the listing; problems go to `err`.
    pub fn render<O: Write, E: Write>(&self, format: Format, out: &mut O, err: &mut E) -> io::Result<()> {
        writeln!(out, "\n{}", self.title)?;
        match format {
            Format::Raw => {
                let json = self.raw_json().map_err(io::Error::other)?;
                writeln!(out, "{json}")?;
            }
            Format::Summary => {
                for (label, consumers) in &self.events {
                    writeln!(out)?;
                    writeln!(out, "{label}")?;
                    for consumer in consumers {
                        match consumer.docstring() {
                            Some(lines) => writeln!(out, "  - {}", lines[0])?,
                            None => writeln!(err, "  x {} (no docstring)", consumer.name())?,
                        }
                    }
                }
            }
            Format::Verbose => {
                for (label, consumers) in &self.events {
                    writeln!(out)?;
                    writeln!(out, "{label}")?;
                    writeln!(out)?;
                    for consumer in consumers {
                        match consumer.docstring() {
                            Some(lines) => {
                                writeln!(out, "  - {}:", consumer.name())?;
                                for line in lines {
                                    writeln!(out, "    {line}")?;
                                }
                            }
                            None => writeln!(err, "  x {} (no docstring)", consumer.name())?,
                        }
                        writeln!(out)?;
                    }
                }
            }
        }

        let missing = self.missing_docstrings();
        if missing.is_empty() {
            writeln!(out, "\nAll registered functions have docstrings")?;
        } else {
            writeln!(err, "\nThe following functions have no docstrings:")?;
            for name in missing {
                writeln!(err, "  {name}")?;
            }
        }
        Ok(())
    }
}
