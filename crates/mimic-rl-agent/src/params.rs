//! Bulk parameter transfer into session variables
//!
//! Used to load saved weights into a freshly built policy and to copy
//! parameters between policies. Destination variables are picked either by
//! scope (every trainable variable under it, in declaration order) or by an
//! explicit list of handles, never both.

use ndarray::ArrayD;
use tracing::debug;

use mimic_rl_core::{RLError, Result};

use crate::session::{Session, VarHandle};

/// Builder for assigning a list of values to session variables
///
/// ```
/// use mimic_rl_agent::{Session, VarAssign};
/// use ndarray::{arr1, ArrayD, IxDyn};
///
/// let mut session = Session::new();
/// session.create_variable("net/w", ArrayD::zeros(IxDyn(&[2])), true)?;
/// VarAssign::new(vec![arr1(&[1.0_f32, 2.0]).into_dyn()])
///     .scope("net")
///     .session(&mut session)
///     .apply()?;
/// # Ok::<(), mimic_rl_core::RLError>(())
/// ```
#[derive(Debug)]
#[must_use = "nothing is written until `apply` is called"]
pub struct VarAssign<'a> {
    values: Vec<ArrayD<f32>>,
    scope: Option<String>,
    vars: Option<Vec<VarHandle>>,
    session: Option<&'a mut Session>,
}

impl<'a> VarAssign<'a> {
    /// Start an assignment of `values`
    pub fn new(values: Vec<ArrayD<f32>>) -> Self {
        Self {
            values,
            scope: None,
            vars: None,
            session: None,
        }
    }

    /// Target every trainable variable under `scope`
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Target an explicit list of variables
    pub fn vars(mut self, vars: &[VarHandle]) -> Self {
        self.vars = Some(vars.to_vec());
        self
    }

    /// Session holding the target variables
    pub fn session(mut self, session: &'a mut Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Validate everything, then write the values in order.
    ///
    /// No variable is written unless every check passes.
    pub fn apply(self) -> Result<()> {
        let Self {
            values,
            scope,
            vars,
            session,
        } = self;

        let selector = match (scope, vars) {
            (Some(scope), None) => Selector::Scope(scope),
            (None, Some(vars)) => Selector::Vars(vars),
            (Some(_), Some(_)) => {
                return Err(RLError::Configuration(
                    "give either a scope or a variable list, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(RLError::Configuration(
                    "a scope or a variable list is required".to_string(),
                ))
            }
        };
        let session = session.ok_or(RLError::NoActiveSession)?;

        let targets = match selector {
            Selector::Scope(scope) => session.trainable_variables(&scope),
            Selector::Vars(vars) => {
                for &handle in &vars {
                    session.check_handle(handle)?;
                }
                vars
            }
        };

        if targets.len() != values.len() {
            return Err(RLError::count_mismatch(targets.len(), values.len()));
        }
        for (&handle, value) in targets.iter().zip(&values) {
            let current = session.value(handle)?;
            if current.shape() != value.shape() {
                return Err(RLError::ShapeMismatch {
                    expected: current.shape().to_vec(),
                    actual: value.shape().to_vec(),
                });
            }
        }

        debug!(variables = targets.len(), session = session.id().get(), "assigning variables");
        for (handle, value) in targets.into_iter().zip(values) {
            session.assign(handle, value)?;
        }
        Ok(())
    }
}

enum Selector {
    Scope(String),
    Vars(Vec<VarHandle>),
}

/// Keyword-style form of [`VarAssign`]
pub fn set_vars(
    values: Vec<ArrayD<f32>>,
    scope: Option<&str>,
    vars: Option<&[VarHandle]>,
    session: Option<&mut Session>,
) -> Result<()> {
    let mut assign = VarAssign::new(values);
    if let Some(scope) = scope {
        assign = assign.scope(scope);
    }
    if let Some(vars) = vars {
        assign = assign.vars(vars);
    }
    if let Some(session) = session {
        assign = assign.session(session);
    }
    assign.apply()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use proptest::prelude::*;

    fn filled(shape: &[usize], value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(shape), value)
    }

    fn two_var_session() -> (Session, VarHandle, VarHandle) {
        let mut session = Session::new();
        let w = session.create_variable("p/w", filled(&[2, 2], 0.0), true).unwrap();
        let b = session.create_variable("p/b", filled(&[2], 0.0), true).unwrap();
        (session, w, b)
    }

    #[test]
    fn test_assign_by_scope() {
        let (mut session, w, b) = two_var_session();
        VarAssign::new(vec![filled(&[2, 2], 1.5), filled(&[2], -1.0)])
            .scope("p")
            .session(&mut session)
            .apply()
            .unwrap();
        assert_eq!(session.value(w).unwrap(), &filled(&[2, 2], 1.5));
        assert_eq!(session.value(b).unwrap(), &filled(&[2], -1.0));
    }

    #[test]
    fn test_assign_by_handles() {
        let (mut session, w, b) = two_var_session();
        set_vars(vec![filled(&[2], 3.0)], None, Some(&[b]), Some(&mut session)).unwrap();
        assert_eq!(session.value(b).unwrap(), &filled(&[2], 3.0));
        assert_eq!(session.value(w).unwrap(), &filled(&[2, 2], 0.0));
    }

    #[test]
    fn test_selector_must_be_exactly_one() {
        let (mut session, w, _) = two_var_session();
        let both = VarAssign::new(vec![])
            .scope("p")
            .vars(&[w])
            .session(&mut session)
            .apply();
        assert!(matches!(both, Err(RLError::Configuration(_))));

        let neither = VarAssign::new(vec![]).session(&mut session).apply();
        assert!(matches!(neither, Err(RLError::Configuration(_))));
    }

    #[test]
    fn test_missing_session() {
        let result = set_vars(vec![], Some("p"), None, None);
        assert!(matches!(result, Err(RLError::NoActiveSession)));
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let (_, w, _) = two_var_session();
        let mut other = Session::new();
        let result = VarAssign::new(vec![filled(&[2, 2], 1.0)])
            .vars(&[w])
            .session(&mut other)
            .apply();
        assert!(matches!(result, Err(RLError::WrongContext { .. })));
    }

    #[test]
    fn test_count_mismatch() {
        let (mut session, ..) = two_var_session();
        let result = set_vars(vec![filled(&[2, 2], 1.0)], Some("p"), None, Some(&mut session));
        assert!(matches!(result, Err(RLError::ShapeMismatch { ref expected, ref actual })
            if expected == &vec![2] && actual == &vec![1]));
    }

    #[test]
    fn test_shape_mismatch_writes_nothing() {
        let (mut session, w, b) = two_var_session();
        let result = VarAssign::new(vec![filled(&[2, 2], 9.0), filled(&[3], 9.0)])
            .scope("p")
            .session(&mut session)
            .apply();
        assert!(matches!(result, Err(RLError::ShapeMismatch { .. })));
        assert_eq!(session.value(w).unwrap(), &filled(&[2, 2], 0.0));
        assert_eq!(session.value(b).unwrap(), &filled(&[2], 0.0));
    }

    proptest! {
        #[test]
        fn prop_assigned_values_round_trip(
            shapes in prop::collection::vec(prop::collection::vec(1usize..4, 1..3), 1..6),
            seed in -10.0f32..10.0,
        ) {
            let mut session = Session::new();
            let handles: Vec<_> = shapes
                .iter()
                .enumerate()
                .map(|(i, shape)| {
                    session.create_variable(format!("net/v{i}"), ArrayD::zeros(IxDyn(shape)), true).unwrap()
                })
                .collect();
            let values: Vec<_> = shapes
                .iter()
                .enumerate()
                .map(|(i, shape)| filled(shape, seed + i as f32))
                .collect();

            VarAssign::new(values.clone()).scope("net").session(&mut session).apply().unwrap();
            prop_assert_eq!(session.read(&handles).unwrap(), values);
        }
    }
}
