//! Grouping keys
//!
//! A grouping key is a chain of hierarchy selectors joined by `#`, e.g.
//! `DataSetType#Project`. An optional `:merge` suffix allows groups that are
//! too small to be merged. A pipeline is a comma separated list of keys:
//!
//! ```text
//! DataSetType#Space, DataSetType#Project:merge, DataSet:merge
//! ```

use segstore_core::{DataSetRecord, SegStoreError};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MERGE_MARKER: &str = "merge";
const SELECTOR_SEPARATOR: char = '#';
const SPEC_SEPARATOR: char = ',';

/// Grouping key parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid basic grouping key '{name}' (valid values are {valid})")]
    UnknownSelector { name: String, valid: String },

    #[error("'merge' is expected after ':' in grouping key '{0}'")]
    MergeExpected(String),

    #[error("Empty grouping key in '{0}'")]
    EmptySpec(String),

    #[error("No grouping key specified")]
    EmptyPipeline,
}

impl From<PipelineError> for SegStoreError {
    fn from(err: PipelineError) -> Self {
        SegStoreError::Configuration(err.to_string())
    }
}

/// One hierarchy attribute used to build a compound key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Everything in one group
    All,
    Unit,
    SubUnit,
    Experiment,
    Sample,
    DataSetType,
    /// Every data set on its own
    DataSet,
}

/// Accepted names, canonical name first for each selector
const SELECTOR_NAMES: &[(&str, Selector)] = &[
    ("All", Selector::All),
    ("Unit", Selector::Unit),
    ("Space", Selector::Unit),
    ("SubUnit", Selector::SubUnit),
    ("Project", Selector::SubUnit),
    ("Experiment", Selector::Experiment),
    ("Sample", Selector::Sample),
    ("DataSetType", Selector::DataSetType),
    ("Type", Selector::DataSetType),
    ("DataSet", Selector::DataSet),
];

impl Selector {
    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Selector::All => "All",
            Selector::Unit => "Unit",
            Selector::SubUnit => "SubUnit",
            Selector::Experiment => "Experiment",
            Selector::Sample => "Sample",
            Selector::DataSetType => "DataSetType",
            Selector::DataSet => "DataSet",
        }
    }

    /// Look up a selector by name, ignoring case
    pub fn by_name(name: &str) -> Result<Self, PipelineError> {
        SELECTOR_NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, selector)| *selector)
            .ok_or_else(|| PipelineError::UnknownSelector {
                name: name.to_string(),
                valid: valid_names(),
            })
    }

    /// Key component of a data set.
    ///
    /// Sub-unit and experiment codes are only unique within their parent, so
    /// they are qualified by the parent path. An absent sample is the empty string.
    pub fn component<'a>(&self, record: &'a DataSetRecord) -> Cow<'a, str> {
        let h = &record.hierarchy;
        match self {
            Selector::All => Cow::Borrowed(""),
            Selector::Unit => Cow::Borrowed(&h.unit),
            Selector::SubUnit => Cow::Owned(format!("{}/{}", h.unit, h.sub_unit)),
            Selector::Experiment => Cow::Owned(format!(
                "{}/{}/{}",
                h.unit, h.sub_unit, h.experiment
            )),
            Selector::Sample => Cow::Borrowed(h.sample.as_deref().unwrap_or("")),
            Selector::DataSetType => Cow::Borrowed(&h.data_set_type),
            Selector::DataSet => Cow::Borrowed(&record.id),
        }
    }
}

fn valid_names() -> String {
    let names: Vec<&str> = SELECTOR_NAMES.iter().map(|(name, _)| *name).collect();
    format!("[{}]", names.join(", "))
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compound grouping key plus the merge-on-shortfall flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKeySpec {
    selectors: Vec<Selector>,
    merge: bool,
}

impl GroupKeySpec {
    pub fn new(selectors: Vec<Selector>, merge: bool) -> Self {
        Self { selectors, merge }
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn merge(&self) -> bool {
        self.merge
    }

    /// Compound key of a data set
    pub fn key_of(&self, record: &DataSetRecord) -> String {
        let components: Vec<Cow<'_, str>> = self
            .selectors
            .iter()
            .map(|selector| selector.component(record))
            .collect();
        components.join("#")
    }
}

impl FromStr for GroupKeySpec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let (chain, merge) = match spec.split_once(':') {
            Some((chain, suffix)) => {
                if !suffix.trim().eq_ignore_ascii_case(MERGE_MARKER) {
                    return Err(PipelineError::MergeExpected(spec.to_string()));
                }
                (chain, true)
            }
            None => (spec, false),
        };
        if chain.trim().is_empty() {
            return Err(PipelineError::EmptySpec(spec.to_string()));
        }

        let selectors = chain
            .split(SELECTOR_SEPARATOR)
            .map(|name| Selector::by_name(name.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors, merge })
    }
}

impl fmt::Display for GroupKeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.selectors.iter().map(Selector::name).collect();
        f.write_str(&names.join("#"))?;
        if self.merge {
            write!(f, ":{}", MERGE_MARKER)?;
        }
        Ok(())
    }
}

/// Ordered list of grouping keys, tried first to last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    specs: Vec<GroupKeySpec>,
}

impl Pipeline {
    pub fn new(specs: Vec<GroupKeySpec>) -> Result<Self, PipelineError> {
        if specs.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[GroupKeySpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FromStr for Pipeline {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        let specs = s
            .split(SPEC_SEPARATOR)
            .map(str::parse)
            .collect::<Result<Vec<GroupKeySpec>, _>>()?;
        Self::new(specs)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs: Vec<String> = self.specs.iter().map(ToString::to_string).collect();
        f.write_str(&specs.join(", "))
    }
}
