//! Materialized migration plans.

/// An ordered list of dialect-specific SQL statements realizing a change
/// list, each optionally paired with its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub name: String,
    /// True when every change carries a reverse statement.
    pub reversible: bool,
    /// True when the dialect can run the whole plan inside one transaction.
    pub transactional: bool,
    pub changes: Vec<PlanChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanChange {
    /// The forward statement, without a trailing delimiter.
    pub cmd: String,
    /// The statement undoing `cmd`, when one exists.
    pub reverse: Option<String>,
    pub comment: Option<String>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Plan {
            name: name.into(),
            reversible: true,
            transactional: true,
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn push(&mut self, change: PlanChange) {
        if change.reverse.is_none() {
            self.reversible = false;
        }
        self.changes.push(change);
    }
}

/// Options applied when rendering a plan.
#[derive(Debug, Default, Clone)]
pub struct PlanOptions {
    /// Qualify object names with this schema instead of the one recorded in
    /// the realm.
    pub schema_qualifier: Option<String>,
    /// Strip schema qualifiers entirely; used when planning against a
    /// single-schema scope.
    pub single_schema: bool,
}
