//! Pattern query types
//!
//! A pattern names a few variables, each bound to an event type, puts
//! independent range constraints on their attributes and bounds the whole
//! match by a time window.
//!
//! ```rust,ignore
//! let pattern = Pattern::sequence(100)
//!     .variable("a", "IBM")
//!     .variable("b", "MSFT")
//!     .constraint(Constraint::new("a", "open").compare(CompareOp::Ge, 100.0).compare(CompareOp::Le, 165.0))
//!     .constraint(Constraint::new("b", "volume").compare(CompareOp::Gt, 80.0));
//! ```
//!
//! Sequences and conjunctions can also nest, e.g. `SEQ(a, AND(b, c), d)`:
//!
//! ```rust,ignore
//! let pattern = Pattern::nested(
//!     100,
//!     PatternNode::seq([PatternNode::var("a"), PatternNode::and(["b", "c"]), PatternNode::var("d")]),
//! )
//! .variable("a", "A")
//! .variable("b", "B")
//! .variable("c", "C")
//! .variable("d", "D");
//! ```

use crate::query::filter::Predicate;
use crate::query::{QueryError, QueryResult};
use crate::storage::{EventSchema, IndexedAttributes};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How the variables of a pattern combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Variables must occur in declaration order
    #[default]
    Sequence,
    /// Variables may occur in any order
    Conjunction,
    /// Any one variable suffices
    Disjunction,
    /// Variables combine as described by [`Pattern::tree`]
    Nested,
}

/// Operator tree of a nested pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternNode {
    /// A declared variable
    Var(String),
    /// Children in order
    Seq(Vec<PatternNode>),
    /// Children in any order
    And(Vec<PatternNode>),
}

impl PatternNode {
    pub fn var(name: impl Into<String>) -> Self {
        PatternNode::Var(name.into())
    }

    pub fn seq<N: Into<PatternNode>>(children: impl IntoIterator<Item = N>) -> Self {
        PatternNode::Seq(children.into_iter().map(Into::into).collect())
    }

    pub fn and<N: Into<PatternNode>>(children: impl IntoIterator<Item = N>) -> Self {
        PatternNode::And(children.into_iter().map(Into::into).collect())
    }

    /// The variable every match must start with, if there is exactly one.
    /// An `And` on the leftmost path leaves the first event open.
    pub fn leftmost(&self) -> Option<&str> {
        match self {
            PatternNode::Var(name) => Some(name.as_str()),
            PatternNode::Seq(children) => children.first()?.leftmost(),
            PatternNode::And(_) => None,
        }
    }

    /// The variable every match must end with, if there is exactly one
    pub fn rightmost(&self) -> Option<&str> {
        match self {
            PatternNode::Var(name) => Some(name.as_str()),
            PatternNode::Seq(children) => children.last()?.rightmost(),
            PatternNode::And(_) => None,
        }
    }

    /// Leaf variable names, left to right
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            PatternNode::Var(name) => names.push(name.as_str()),
            PatternNode::Seq(children) | PatternNode::And(children) => {
                for child in children {
                    child.collect_variables(names);
                }
            }
        }
    }

    fn has_empty_operator(&self) -> bool {
        match self {
            PatternNode::Var(_) => false,
            PatternNode::Seq(children) | PatternNode::And(children) => {
                children.is_empty() || children.iter().any(PatternNode::has_empty_operator)
            }
        }
    }
}

impl From<&str> for PatternNode {
    fn from(name: &str) -> Self {
        PatternNode::var(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// One bound of a constraint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub value: f64,
    /// Strict bounds exclude `value` itself
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub event_type: String,
}

/// Range constraint on one attribute of one variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub variable: String,
    pub attribute: String,
    #[serde(default)]
    pub min: Option<Bound>,
    #[serde(default)]
    pub max: Option<Bound>,
}

impl Constraint {
    pub fn new(variable: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            attribute: attribute.into(),
            min: None,
            max: None,
        }
    }

    /// Builder method: tighten with `attribute <op> value`
    pub fn compare(mut self, op: CompareOp, value: f64) -> Self {
        let inclusive = Bound { value, strict: false };
        let strict = Bound { value, strict: true };
        match op {
            CompareOp::Ge => self.min = Some(inclusive),
            CompareOp::Gt => self.min = Some(strict),
            CompareOp::Le => self.max = Some(inclusive),
            CompareOp::Lt => self.max = Some(strict),
            CompareOp::Eq => {
                self.min = Some(inclusive);
                self.max = Some(inclusive);
            }
        }
        self
    }

    /// Resolve into a predicate on the scaled index domain
    ///
    /// Strict bounds become inclusive after scaling: `> v` is `>= v + 1`.
    pub fn to_predicate(
        &self,
        schema: &EventSchema,
        indexed: &IndexedAttributes,
    ) -> QueryResult<Predicate> {
        let attr = indexed
            .position(&self.attribute)
            .ok_or_else(|| QueryError::UnknownAttribute(self.attribute.clone()))?;
        let slot = indexed
            .slot(attr)
            .ok_or_else(|| QueryError::UnknownAttribute(self.attribute.clone()))?;

        if self.min.is_none() && self.max.is_none() {
            return Err(QueryError::InvalidConstraint(format!(
                "{}.{} has no bound",
                self.variable, self.attribute
            )));
        }

        let min = match self.min {
            Some(b) => {
                let v = schema.scale(slot, b.value)?;
                Some(if b.strict { v.saturating_add(1) } else { v })
            }
            None => None,
        };
        let max = match self.max {
            Some(b) => {
                let v = schema.scale(slot, b.value)?;
                Some(if b.strict { v.saturating_sub(1) } else { v })
            }
            None => None,
        };
        Predicate::new(attr, min, max)
    }
}

/// A complex event pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub kind: PatternKind,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Maximum time span of a match
    pub window: i64,
    /// Operator tree, used only by [`PatternKind::Nested`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<PatternNode>,
}

impl Pattern {
    pub fn new(kind: PatternKind, window: i64) -> Self {
        Self {
            kind,
            variables: Vec::new(),
            constraints: Vec::new(),
            window,
            tree: None,
        }
    }

    pub fn sequence(window: i64) -> Self {
        Self::new(PatternKind::Sequence, window)
    }

    pub fn conjunction(window: i64) -> Self {
        Self::new(PatternKind::Conjunction, window)
    }

    /// Pattern shaped by `tree`; its leaves still need declaring with
    /// [`Pattern::variable`]
    pub fn nested(window: i64, tree: PatternNode) -> Self {
        Self {
            tree: Some(tree),
            ..Self::new(PatternKind::Nested, window)
        }
    }

    /// Builder method: declare a variable
    pub fn variable(mut self, name: impl Into<String>, event_type: impl Into<String>) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            event_type: event_type.into(),
        });
        self
    }

    /// Builder method: add a constraint
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn position(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == variable)
    }

    /// Reject patterns the index cannot filter
    pub fn validate(&self) -> QueryResult<()> {
        if self.kind == PatternKind::Disjunction {
            return Err(QueryError::DisjunctionUnsupported);
        }
        if self.window < 0 {
            return Err(QueryError::InvalidConstraint(format!(
                "negative window {}",
                self.window
            )));
        }
        let mut names = HashSet::with_capacity(self.variables.len());
        for variable in &self.variables {
            if !names.insert(variable.name.as_str()) {
                return Err(QueryError::InvalidConstraint(format!(
                    "variable '{}' declared twice",
                    variable.name
                )));
            }
        }
        for constraint in &self.constraints {
            if self.position(&constraint.variable).is_none() {
                return Err(QueryError::UnknownVariable(constraint.variable.clone()));
            }
        }
        if self.kind == PatternKind::Nested {
            self.validate_tree(&names)?;
        }
        Ok(())
    }

    /// Every declared variable appears exactly once as a leaf
    fn validate_tree(&self, declared: &HashSet<&str>) -> QueryResult<()> {
        let tree = self.tree.as_ref().ok_or_else(|| {
            QueryError::InvalidConstraint("nested pattern without a tree".to_string())
        })?;
        if tree.has_empty_operator() {
            return Err(QueryError::InvalidConstraint(
                "operator without operands".to_string(),
            ));
        }

        let leaves = tree.variables();
        let mut seen = HashSet::with_capacity(leaves.len());
        for name in &leaves {
            if !declared.contains(name) {
                return Err(QueryError::UnknownVariable(name.to_string()));
            }
            if !seen.insert(*name) {
                return Err(QueryError::InvalidConstraint(format!(
                    "variable '{}' appears twice in the tree",
                    name
                )));
            }
        }
        if let Some(missing) = self.variables.iter().find(|v| !seen.contains(v.name.as_str())) {
            return Err(QueryError::InvalidConstraint(format!(
                "variable '{}' is missing from the tree",
                missing.name
            )));
        }
        Ok(())
    }

    /// Predicates of the variable at `position`
    pub fn predicates(
        &self,
        position: usize,
        schema: &EventSchema,
        indexed: &IndexedAttributes,
    ) -> QueryResult<Vec<Predicate>> {
        let Some(variable) = self.variables.get(position) else {
            return Ok(Vec::new());
        };
        self.constraints
            .iter()
            .filter(|c| c.variable == variable.name)
            .map(|c| c.to_predicate(schema, indexed))
            .collect()
    }

    /// Variables a match must start and end with, when they are fixed
    fn edges(&self) -> (Option<&str>, Option<&str>) {
        match self.kind {
            PatternKind::Sequence => (
                self.variables.first().map(|v| v.name.as_str()),
                self.variables.last().map(|v| v.name.as_str()),
            ),
            PatternKind::Nested => match &self.tree {
                Some(tree) => (tree.leftmost(), tree.rightmost()),
                None => (None, None),
            },
            PatternKind::Conjunction | PatternKind::Disjunction => (None, None),
        }
    }

    /// Offsets `(left, right)` that widen a match of the variable at
    /// `position` into the window other variables must fall in
    ///
    /// Only the sole first variable of every match looks forward only, and
    /// only the sole last one looks backward only.
    pub fn interval_offsets(&self, position: usize) -> (i64, i64) {
        let tau = self.window;
        let Some(name) = self.variables.get(position).map(|v| v.name.as_str()) else {
            return (-tau, tau);
        };
        let (leftmost, rightmost) = self.edges();
        if leftmost == Some(name) {
            (0, tau)
        } else if rightmost == Some(name) {
            (-tau, 0)
        } else {
            (-tau, tau)
        }
    }
}
