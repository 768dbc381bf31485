//! Arithmetic, logic and comparison instructions.
//!
//! Mixed int/float arithmetic promotes to float; `pow` always does.
//! Integer division and modulo with a zero divisor are fatal, float
//! division follows IEEE. Logic results are always `int 1`/`int 0`.

use std::cmp::Ordering;

use buzz_asm::Opcode;

use super::Vm;
use crate::error::ErrorKind;
use crate::value::{Handle, TypeTag, Value};

/// The two operands of a binary numeric instruction, promoted together.
enum Operands {
    Int(i32, i32),
    Float(f32, f32),
}

impl Vm {
    fn pop_numeric(&mut self) -> Result<Operands, ErrorKind> {
        let (_, bv) = self.pop_obj()?;
        let b = bv.clone();
        let (_, av) = self.pop_obj()?;
        match (av, &b) {
            (Value::Int(a), Value::Int(b)) => Ok(Operands::Int(*a, *b)),
            (Value::Int(a), Value::Float(b)) => Ok(Operands::Float(*a as f32, *b)),
            (Value::Float(a), Value::Int(b)) => Ok(Operands::Float(*a, *b as f32)),
            (Value::Float(a), Value::Float(b)) => Ok(Operands::Float(*a, *b)),
            (a, b) => {
                let got = if a.as_number().is_some() { b.tag() } else { a.tag() };
                Err(ErrorKind::type_mismatch(TypeTag::Int, got))
            }
        }
    }

    pub(crate) fn exec_arith(&mut self, op: Opcode) -> Result<(), ErrorKind> {
        let result = match (op, self.pop_numeric()?) {
            (Opcode::Add, Operands::Int(a, b)) => Value::Int(a.wrapping_add(b)),
            (Opcode::Add, Operands::Float(a, b)) => Value::Float(a + b),
            (Opcode::Sub, Operands::Int(a, b)) => Value::Int(a.wrapping_sub(b)),
            (Opcode::Sub, Operands::Float(a, b)) => Value::Float(a - b),
            (Opcode::Mul, Operands::Int(a, b)) => Value::Int(a.wrapping_mul(b)),
            (Opcode::Mul, Operands::Float(a, b)) => Value::Float(a * b),
            (Opcode::Div, Operands::Int(_, 0)) => return Err(ErrorKind::DivByZero),
            (Opcode::Div, Operands::Int(a, b)) => Value::Int(a.wrapping_div(b)),
            (Opcode::Div, Operands::Float(a, b)) => Value::Float(a / b),
            (Opcode::Mod, Operands::Int(_, 0)) => return Err(ErrorKind::DivByZero),
            // The remainder takes the sign of the dividend.
            (Opcode::Mod, Operands::Int(a, b)) => Value::Int(a.wrapping_rem(b)),
            (Opcode::Mod, Operands::Float(a, b)) => Value::Float(a % b),
            (Opcode::Pow, Operands::Int(a, b)) => Value::Float((a as f32).powf(b as f32)),
            (Opcode::Pow, Operands::Float(a, b)) => Value::Float(a.powf(b)),
            _ => unreachable!("non-arithmetic opcode routed to exec_arith"),
        };
        self.push_value(result);
        Ok(())
    }

    pub(crate) fn exec_unm(&mut self) -> Result<(), ErrorKind> {
        let (_, v) = self.pop_obj()?;
        let result = match v {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            Value::Float(x) => Value::Float(-x),
            v => return Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
        };
        self.push_value(result);
        Ok(())
    }

    pub(crate) fn exec_logic(&mut self, op: Opcode) -> Result<(), ErrorKind> {
        let result = match op {
            Opcode::Lnot => {
                let (_, v) = self.pop_obj()?;
                !v.is_truthy()
            }
            _ => {
                let (_, bv) = self.pop_obj()?;
                let b = bv.is_truthy();
                let (_, av) = self.pop_obj()?;
                let a = av.is_truthy();
                match op {
                    Opcode::Land => a && b,
                    Opcode::Lor => a || b,
                    _ => unreachable!("non-logic opcode routed to exec_logic"),
                }
            }
        };
        self.push_value(Value::Int(result as i32));
        Ok(())
    }

    pub(crate) fn exec_bitwise(&mut self, op: Opcode) -> Result<(), ErrorKind> {
        if op == Opcode::Bnot {
            let a = self.pop_int()?;
            self.push_value(Value::Int(!a));
            return Ok(());
        }
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = match op {
            Opcode::Band => a & b,
            Opcode::Bor => a | b,
            Opcode::Lshift => a.wrapping_shl(b as u32),
            Opcode::Rshift => a.wrapping_shr(b as u32),
            _ => unreachable!("non-bitwise opcode routed to exec_bitwise"),
        };
        self.push_value(Value::Int(result));
        Ok(())
    }

    pub(crate) fn exec_compare(&mut self, op: Opcode) -> Result<(), ErrorKind> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match op {
            Opcode::Eq => self.handles_equal(a, b)?,
            Opcode::Neq => !self.handles_equal(a, b)?,
            _ => {
                let ord = self.handles_order(a, b)?;
                match op {
                    Opcode::Gt => ord == Some(Ordering::Greater),
                    Opcode::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    Opcode::Lt => ord == Some(Ordering::Less),
                    Opcode::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                    _ => unreachable!("non-compare opcode routed to exec_compare"),
                }
            }
        };
        self.push_value(Value::Int(result as i32));
        Ok(())
    }

    /// Equality over any tags: scalars structurally (numbers cross-tag,
    /// strings by id), compound values by handle identity.
    fn handles_equal(&self, a: Handle, b: Handle) -> Result<bool, ErrorKind> {
        if a == b {
            return Ok(true);
        }
        let (av, bv) = (self.obj(a)?, self.obj(b)?);
        Ok(crate::value::scalar_cmp(av, bv) == Some(Ordering::Equal))
    }

    /// Ordering over numbers and string pairs; other tags do not order.
    /// `None` marks an incomparable numeric pair (NaN), which simply fails
    /// every ordering test.
    fn handles_order(&self, a: Handle, b: Handle) -> Result<Option<Ordering>, ErrorKind> {
        let (av, bv) = (self.obj(a)?, self.obj(b)?);
        match (av, bv) {
            (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
            _ if av.as_number().is_some() && bv.as_number().is_some() => {
                Ok(crate::value::scalar_cmp(av, bv))
            }
            _ => Err(ErrorKind::type_mismatch(av.tag(), bv.tag())),
        }
    }
}
