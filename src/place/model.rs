//! A small solver-independent MILP model.
//!
//! Keeping our own representation lets the engine name variables for
//! warm starts and check any assignment against the constraints before
//! trusting it.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use crate::error::PlacementError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VarKind {
    Binary,
    Continuous { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub kind: VarKind,
}

/// A linear expression `sum(coef * var) + constant`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LinExpr {
    terms: Vec<(VarId, f64)>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        self.terms.push((var, coef));
    }

    /// Adds `scale * other` to this expression.
    pub fn add_scaled(&mut self, other: &LinExpr, scale: f64) {
        self.terms
            .extend(other.terms.iter().map(|&(v, c)| (v, c * scale)));
        self.constant += other.constant * scale;
    }

    pub fn plus(mut self, other: &LinExpr, scale: f64) -> Self {
        self.add_scaled(other, scale);
        self
    }

    #[inline]
    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    #[inline]
    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn eval(&self, values: &Assignment) -> f64 {
        self.terms
            .iter()
            .map(|&(v, c)| c * values.value(v))
            .sum::<f64>()
            + self.constant
    }
}

impl From<VarId> for LinExpr {
    fn from(var: VarId) -> Self {
        LinExpr::new().term(var, 1.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl Display for Sense {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Sense::Le => write!(f, "<="),
            Sense::Ge => write!(f, ">="),
            Sense::Eq => write!(f, "=="),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub expr: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &Assignment, tol: f64) -> bool {
        let lhs = self.expr.eval(values);
        match self.sense {
            Sense::Le => lhs <= self.rhs + tol,
            Sense::Ge => lhs >= self.rhs - tol,
            Sense::Eq => (lhs - self.rhs).abs() <= tol,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Model {
    vars: Vec<Var>,
    names: HashMap<String, VarId>,
    constraints: Vec<Constraint>,
    objective: LinExpr,
}

impl Model {
    pub fn new() -> Self {
        Default::default()
    }

    fn add_var(&mut self, name: String, kind: VarKind) -> Result<VarId, PlacementError> {
        if self.names.contains_key(&name) {
            return Err(PlacementError::DuplicateVariable { name });
        }
        let id = VarId(self.vars.len());
        self.names.insert(name.clone(), id);
        self.vars.push(Var { name, kind });
        Ok(id)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> Result<VarId, PlacementError> {
        self.add_var(name.into(), VarKind::Binary)
    }

    pub fn add_continuous(
        &mut self,
        name: impl Into<String>,
        min: f64,
        max: f64,
    ) -> Result<VarId, PlacementError> {
        self.add_var(name.into(), VarKind::Continuous { min, max })
    }

    pub fn constrain(&mut self, name: impl Into<String>, expr: LinExpr, sense: Sense, rhs: f64) {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    pub fn set_objective(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    #[inline]
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn find(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    /// The named values whose names are model variables.
    ///
    /// Names unknown to the model are skipped.
    pub fn match_named(&self, named: &BTreeMap<String, f64>) -> Vec<(VarId, f64)> {
        named
            .iter()
            .filter_map(|(name, &v)| Some((self.find(name)?, v)))
            .collect()
    }

    #[inline]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    #[inline]
    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn objective_value(&self, values: &Assignment) -> f64 {
        self.objective.eval(values)
    }

    /// The first constraint or bound violated by `values`, if any.
    pub fn first_violation(&self, values: &Assignment, tol: f64) -> Option<String> {
        if values.len() != self.vars.len() {
            return Some(format!(
                "assignment has {} values for {} variables",
                values.len(),
                self.vars.len()
            ));
        }
        for (i, var) in self.vars.iter().enumerate() {
            let v = values.value(VarId(i));
            let ok = match var.kind {
                VarKind::Binary => v.abs() <= tol || (v - 1.0).abs() <= tol,
                VarKind::Continuous { min, max } => v >= min - tol && v <= max + tol,
            };
            if !ok {
                return Some(format!("variable {} out of domain: {v}", var.name));
            }
        }
        self.constraints
            .iter()
            .find(|c| !c.is_satisfied(values, tol))
            .map(|c| format!("constraint {} violated", c.name))
    }

    #[inline]
    pub fn is_feasible(&self, values: &Assignment, tol: f64) -> bool {
        self.first_violation(values, tol).is_none()
    }
}

/// One value per model variable, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
}

impl Assignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_named(&self, model: &Model) -> BTreeMap<String, f64> {
        model
            .vars()
            .iter()
            .zip(self.values.iter())
            .map(|(var, &v)| (var.name.clone(), v))
            .collect()
    }

    /// Rebuilds a complete assignment from matched values.
    ///
    /// Returns `None` unless every model variable received a value.
    pub fn from_matched(model: &Model, matched: &[(VarId, f64)]) -> Option<Self> {
        let mut values = vec![None; model.vars().len()];
        for &(id, v) in matched.iter() {
            values[id.0] = Some(v);
        }
        values.into_iter().collect::<Option<Vec<f64>>>().map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knapsack() -> (Model, VarId, VarId) {
        let mut model = Model::new();
        let a = model.add_binary("a").unwrap();
        let b = model.add_binary("b").unwrap();
        model.constrain("pick_one", LinExpr::from(a).term(b, 1.0), Sense::Eq, 1.0);
        model.set_objective(LinExpr::new().term(a, 3.0).term(b, 2.0));
        (model, a, b)
    }

    #[test]
    fn test_feasibility_check() {
        let (model, _, _) = knapsack();
        assert!(model.is_feasible(&Assignment::new(vec![0.0, 1.0]), 1e-6));
        assert!(!model.is_feasible(&Assignment::new(vec![1.0, 1.0]), 1e-6));
        assert!(!model.is_feasible(&Assignment::new(vec![0.5, 0.5]), 1e-6));
        assert_eq!(model.objective_value(&Assignment::new(vec![0.0, 1.0])), 2.0);
    }

    #[test]
    fn test_named_round_trip_skips_unknown_names() {
        let (model, a, _) = knapsack();
        let mut named = Assignment::new(vec![1.0, 0.0]).to_named(&model);
        named.insert("stale".to_string(), 7.0);
        let matched = model.match_named(&named);
        assert_eq!(matched.len(), 2);
        assert_eq!(Assignment::from_matched(&model, &matched).unwrap().value(a), 1.0);
    }

    #[test]
    fn test_partial_names_match_without_completing() {
        let (model, a, _) = knapsack();
        let mut named = Assignment::new(vec![1.0, 0.0]).to_named(&model);
        named.remove("b");
        let matched = model.match_named(&named);
        assert_eq!(matched, vec![(a, 1.0)]);
        assert!(Assignment::from_matched(&model, &matched).is_none());
    }

    #[test]
    fn test_duplicate_variable_name_is_an_error() {
        let (mut model, _, _) = knapsack();
        assert!(matches!(
            model.add_continuous("a", 0.0, 1.0),
            Err(PlacementError::DuplicateVariable { name }) if name == "a"
        ));
        assert_eq!(model.vars().len(), 2);
    }
}
