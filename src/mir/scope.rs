use crate::types::Type;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarType {
    Value(Type),

    /// A function's vararg group; only usable spread into a call
    Group(Vec<Type>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub ty: VarType,
    pub is_final: bool,

    /// Declared at the top level of some module
    pub is_global: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Every outer name is visible
    Full,

    /// Entered for a lambda body: outer names are only visible if final
    FinalsOnly,
}

#[derive(Clone, Debug)]
struct Frame {
    kind: FrameKind,
    vars: Vec<Variable>,
}

/// Why a lookup did not produce a variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupError {
    Unknown,

    /// Visible, but only across a lambda boundary, and not final
    NotCapturable,
}

/// A variable environment as a stack of frames with shadowing lookup.
///
/// Frames are pushed on block, argument and lambda entry and popped when
/// they end, so nothing outlives the instantiation that created it.
#[derive(Clone, Debug)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope {
            frames: vec![Frame {
                kind: FrameKind::Full,
                vars: Vec::new(),
            }],
        }
    }

    pub fn push(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            vars: Vec::new(),
        });
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Declares in the innermost frame. Fails if that frame already has the name
    pub fn declare(&mut self, var: Variable) -> Result<(), Variable> {
        let frame = match self.frames.last_mut() {
            Some(f) => f,
            None => return Err(var),
        };

        if let Some(existing) = frame.vars.iter().find(|v| v.name == var.name) {
            return Err(existing.clone());
        }

        frame.vars.push(var);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Variable, LookupError> {
        let mut crossed_lambda = false;

        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.vars.iter().rev().find(|v| v.name == name) {
                if crossed_lambda && !v.is_final {
                    return Err(LookupError::NotCapturable);
                }
                return Ok(v);
            }

            if frame.kind == FrameKind::FinalsOnly {
                crossed_lambda = true;
            }
        }

        Err(LookupError::Unknown)
    }

    /// True when the innermost lambda frame (if any) is inside this scope
    pub fn in_lambda(&self) -> bool {
        self.frames.iter().any(|f| f.kind == FrameKind::FinalsOnly)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Type, is_final: bool) -> Variable {
        Variable {
            name: name.to_owned(),
            ty: VarType::Value(ty),
            is_final,
            is_global: false,
        }
    }

    #[test]
    fn inner_frames_shadow() {
        let mut s = Scope::new();
        s.declare(var("x", Type::int(), false)).unwrap();
        s.push(FrameKind::Full);
        s.declare(var("x", Type::string(), false)).unwrap();

        assert_eq!(s.lookup("x").unwrap().ty, VarType::Value(Type::string()));
        s.pop();
        assert_eq!(s.lookup("x").unwrap().ty, VarType::Value(Type::int()));
    }

    #[test]
    fn same_frame_redeclaration_fails() {
        let mut s = Scope::new();
        s.declare(var("x", Type::int(), false)).unwrap();

        assert!(s.declare(var("x", Type::int(), true)).is_err());
    }

    #[test]
    fn lambdas_only_see_finals() {
        let mut s = Scope::new();
        s.declare(var("mutable", Type::int(), false)).unwrap();
        s.declare(var("fixed", Type::int(), true)).unwrap();

        s.push(FrameKind::FinalsOnly);
        s.declare(var("param", Type::int(), false)).unwrap();
        s.push(FrameKind::Full);

        assert!(s.lookup("fixed").is_ok());
        assert!(s.lookup("param").is_ok());
        assert_eq!(s.lookup("mutable"), Err(LookupError::NotCapturable));
        assert_eq!(s.lookup("missing"), Err(LookupError::Unknown));
        assert!(s.in_lambda());

        s.pop();
        s.pop();
        assert!(s.lookup("mutable").is_ok());
        assert!(!s.in_lambda());
    }
}
