//! Explicit execution context for policy variables.
//!
//! A [`Session`] owns every numeric variable a policy or trainer creates. Variables
//! carry scope-qualified names (`scope/sub/name`) and are addressed through
//! [`VarHandle`]s, which remember the session that issued them. Using a handle with
//! any other session fails with [`RLError::WrongContext`].

use indexmap::IndexMap;
use ndarray::ArrayD;
use std::sync::atomic::{AtomicU64, Ordering};

use mimic_rl_core::{RLError, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Raw identifier value
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Reference to a variable owned by a particular session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarHandle {
    session: SessionId,
    index: usize,
}

impl VarHandle {
    /// Session that owns the variable
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }
}

#[derive(Debug, Clone)]
struct Variable {
    value: ArrayD<f32>,
    trainable: bool,
}

/// Named variable store
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    variables: IndexMap<String, Variable>,
}

impl Session {
    /// Create an empty session with a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            variables: IndexMap::new(),
        }
    }

    /// Identifier of this session
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the session holds no variables
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Register a new variable.
    ///
    /// Fails with `Configuration` when the name is already taken.
    pub fn create_variable(
        &mut self,
        name: impl Into<String>,
        init: ArrayD<f32>,
        trainable: bool,
    ) -> Result<VarHandle> {
        let name = name.into();
        if self.variables.contains_key(&name) {
            return Err(RLError::Configuration(format!(
                "variable {name} already exists in session {}",
                self.id.0
            )));
        }
        let (index, _) = self.variables.insert_full(name, Variable { value: init, trainable });
        Ok(VarHandle {
            session: self.id,
            index,
        })
    }

    /// Look up an existing variable by its full name
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<VarHandle> {
        self.variables.get_index_of(name).map(|index| VarHandle {
            session: self.id,
            index,
        })
    }

    /// Fail with `WrongContext` unless `handle` was issued by this session
    pub fn check_handle(&self, handle: VarHandle) -> Result<()> {
        if handle.session == self.id {
            Ok(())
        } else {
            Err(RLError::WrongContext {
                expected: self.id.0,
                actual: handle.session.0,
            })
        }
    }

    fn entry(&self, handle: VarHandle) -> Result<(&String, &Variable)> {
        self.check_handle(handle)?;
        self.variables
            .get_index(handle.index)
            .ok_or_else(|| RLError::Computation(format!("dangling variable handle {}", handle.index)))
    }

    /// Current value of a variable
    pub fn value(&self, handle: VarHandle) -> Result<&ArrayD<f32>> {
        self.entry(handle).map(|(_, variable)| &variable.value)
    }

    /// Full name of a variable
    pub fn name(&self, handle: VarHandle) -> Result<&str> {
        self.entry(handle).map(|(name, _)| name.as_str())
    }

    /// Mutable access for in-place updates such as optimizer steps
    pub fn value_mut(&mut self, handle: VarHandle) -> Result<&mut ArrayD<f32>> {
        self.check_handle(handle)?;
        self.variables
            .get_index_mut(handle.index)
            .map(|(_, variable)| &mut variable.value)
            .ok_or_else(|| RLError::Computation(format!("dangling variable handle {}", handle.index)))
    }

    /// Overwrite a variable. The new value must have the variable's shape.
    pub fn assign(&mut self, handle: VarHandle, value: ArrayD<f32>) -> Result<()> {
        let current = self.value_mut(handle)?;
        if current.shape() != value.shape() {
            return Err(RLError::ShapeMismatch {
                expected: current.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
        *current = value;
        Ok(())
    }

    /// Copy out the values of several variables, in order
    pub fn read(&self, handles: &[VarHandle]) -> Result<Vec<ArrayD<f32>>> {
        handles.iter().map(|&h| self.value(h).cloned()).collect()
    }

    /// Trainable variables under `scope`, in declaration order.
    ///
    /// An empty scope selects every trainable variable.
    #[must_use]
    pub fn trainable_variables(&self, scope: &str) -> Vec<VarHandle> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, (name, variable))| variable.trainable && in_scope(name, scope))
            .map(|(index, _)| VarHandle {
                session: self.id,
                index,
            })
            .collect()
    }

    /// Whether any variable lives under `scope`
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.variables.keys().any(|name| in_scope(name, scope))
    }

    /// `base` if nothing lives under it yet, otherwise the first free `base_N`
    #[must_use]
    pub fn unique_scope(&self, base: &str) -> String {
        if !self.has_scope(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.has_scope(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn in_scope(name: &str, scope: &str) -> bool {
    scope.is_empty()
        || name
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, ArrayD, IxDyn};

    fn zeros(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(shape))
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        assert_ne!(Session::new().id(), Session::new().id());
    }

    #[test]
    fn test_create_and_find() {
        let mut session = Session::new();
        let w = session.create_variable("a/w", zeros(&[2, 3]), true).unwrap();
        assert_eq!(session.find_variable("a/w"), Some(w));
        assert_eq!(session.name(w).unwrap(), "a/w");
        assert_eq!(session.value(w).unwrap().shape(), &[2, 3]);
        assert!(matches!(
            session.create_variable("a/w", zeros(&[1]), true),
            Err(RLError::Configuration(_))
        ));
    }

    #[test]
    fn test_scope_selection_keeps_declaration_order() {
        let mut session = Session::new();
        let a = session.create_variable("net/fc0/w", zeros(&[1]), true).unwrap();
        session.create_variable("network/w", zeros(&[1]), true).unwrap();
        session.create_variable("net/steps", zeros(&[1]), false).unwrap();
        let b = session.create_variable("net/fc0/b", zeros(&[1]), true).unwrap();

        assert_eq!(session.trainable_variables("net"), vec![a, b]);
        assert_eq!(session.trainable_variables("net/fc0"), vec![a, b]);
        assert_eq!(session.trainable_variables("").len(), 3);
        assert!(session.has_scope("network"));
        assert!(!session.has_scope("net/fc1"));
    }

    #[test]
    fn test_unique_scope() {
        let mut session = Session::new();
        assert_eq!(session.unique_scope("restored"), "restored");
        session.create_variable("restored/w", zeros(&[1]), true).unwrap();
        assert_eq!(session.unique_scope("restored"), "restored_1");
        session.create_variable("restored_1/w", zeros(&[1]), true).unwrap();
        assert_eq!(session.unique_scope("restored"), "restored_2");
    }

    #[test]
    fn test_assign_checks_shape() {
        let mut session = Session::new();
        let v = session.create_variable("v", zeros(&[3]), true).unwrap();
        session.assign(v, arr1(&[1.0_f32, 2.0, 3.0]).into_dyn()).unwrap();
        assert_eq!(session.value(v).unwrap().as_slice().unwrap(), &[1.0, 2.0, 3.0]);

        let err = session.assign(v, zeros(&[2])).unwrap_err();
        assert!(matches!(err, RLError::ShapeMismatch { ref expected, ref actual }
            if expected == &vec![3] && actual == &vec![2]));
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut first = Session::new();
        let second = Session::new();
        let v = first.create_variable("v", zeros(&[1]), true).unwrap();
        assert!(matches!(
            second.value(v),
            Err(RLError::WrongContext { .. })
        ));
    }
}
