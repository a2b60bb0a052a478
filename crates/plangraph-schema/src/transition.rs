//! Status state machines.

/// One legal status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    /// Named precondition evaluated by the caller (e.g. `"dependencies_done"`).
    pub precondition: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            precondition: None,
        }
    }

    /// Attach a precondition tag.
    pub fn requires(mut self, tag: impl Into<String>) -> Self {
        self.precondition = Some(tag.into());
        self
    }
}

/// The exhaustive set of legal `(from, to)` status pairs for a type.
///
/// Anything not listed is illegal, including `(x, x)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    transitions: Vec<Transition>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from bare `(from, to)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            transitions: pairs
                .into_iter()
                .map(|(from, to)| Transition::new(from, to))
                .collect(),
        }
    }

    /// Add a transition.
    pub fn allow(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions.push(Transition::new(from, to));
        self
    }

    /// Add a transition guarded by a precondition tag.
    pub fn allow_if(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        precondition: impl Into<String>,
    ) -> Self {
        self.transitions
            .push(Transition::new(from, to).requires(precondition));
        self
    }

    pub fn find(&self, from: &str, to: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    pub fn allows(&self, from: &str, to: &str) -> bool {
        self.find(from, to).is_some()
    }

    /// Statuses reachable in one step from `from`.
    pub fn targets_from<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.from == from)
            .map(|t| t.to.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
