//! Callable query functions.

use std::fmt;
use std::sync::Arc;

use docql_core::error::{Error, Result};
use docql_core::id::VarId;
use docql_env::{DatumRef, Env, Node};

use crate::value::Value;

type Body = Arc<dyn Fn(&mut Env, &[DatumRef]) -> Result<Value> + Send + Sync>;

/// A function with bound parameter variables.
///
/// Calling binds each parameter for the duration of the body; a
/// single-parameter function whose id allows it also binds the implicit
/// variable. The body receives the arguments directly as well.
#[derive(Clone)]
pub struct Func {
    params: Vec<VarId>,
    body: Body,
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("params", &self.params).finish()
    }
}

impl Func {
    /// Mint `arity` fresh parameters. Unary functions may bind the implicit
    /// variable.
    pub fn new<F>(env: &mut Env, arity: usize, body: F) -> Result<Self>
    where
        F: Fn(&mut Env, &[DatumRef]) -> Result<Value> + Send + Sync + 'static,
    {
        let params = (0..arity)
            .map(|_| env.gensym(arity == 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_params(params, body))
    }

    pub fn with_params<F>(params: Vec<VarId>, body: F) -> Self
    where
        F: Fn(&mut Env, &[DatumRef]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            params,
            body: Arc::new(body),
        }
    }

    /// Unary function from a datum-to-datum closure.
    pub fn unary<F>(env: &mut Env, f: F) -> Result<Self>
    where
        F: Fn(&mut Env, DatumRef) -> Result<DatumRef> + Send + Sync + 'static,
    {
        Self::new(env, 1, move |env, args| Ok(Value::Datum(f(env, args[0])?)))
    }

    /// Binary function from a datum-to-datum closure.
    pub fn binary<F>(env: &mut Env, f: F) -> Result<Self>
    where
        F: Fn(&mut Env, DatumRef, DatumRef) -> Result<DatumRef> + Send + Sync + 'static,
    {
        Self::new(env, 2, move |env, args| {
            Ok(Value::Datum(f(env, args[0], args[1])?))
        })
    }

    /// One-argument function ignoring its argument and returning `value`.
    pub fn constant(env: &mut Env, value: DatumRef) -> Result<Self> {
        Self::new(env, 1, move |_, _| Ok(Value::Datum(value)))
    }

    /// `row[field]`, failing when the field is missing.
    pub fn get_field(env: &mut Env, field: &str) -> Result<Self> {
        let field = field.to_string();
        Self::unary(env, move |env, row| {
            env.get_field(row, &field)?.ok_or_else(|| {
                Error::query(format!("No attribute `{field}` in object."))
            })
        })
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[VarId] {
        &self.params
    }

    pub fn call(&self, env: &mut Env, args: &[DatumRef]) -> Result<Value> {
        if args.len() != self.params.len() {
            return Err(Error::query(format!(
                "Expected {} argument(s) but found {}.",
                self.params.len(),
                args.len()
            )));
        }
        for (&param, &arg) in self.params.iter().zip(args) {
            env.push_var(param, arg);
        }
        let implicit = self.params.len() == 1 && Env::var_allows_implicit(self.params[0]);
        if implicit {
            env.push_implicit(args[0]);
        }

        let result = (self.body)(env, args);

        if implicit {
            env.pop_implicit()?;
        }
        for &param in &self.params {
            env.pop_var(param)?;
        }
        result
    }

    pub fn call_datum(&self, env: &mut Env, args: &[DatumRef]) -> Result<DatumRef> {
        self.call(env, args)?.as_datum()
    }

    /// Call and apply datum truthiness to the result.
    pub fn filter_call(&self, env: &mut Env, arg: DatumRef) -> Result<bool> {
        let r = self.call_datum(env, &[arg])?;
        env.is_truthy(r)
    }

    /// Compare `row[field]` against `value` for equality.
    pub fn field_eq(env: &mut Env, field: &str, value: docql_core::datum::Datum) -> Result<Self> {
        let field = field.to_string();
        Self::unary(env, move |env, row| {
            let hit = match env.get_field(row, &field)? {
                Some(r) => env.to_datum(r)?.compare(&value).is_eq(),
                None => false,
            };
            env.alloc(Node::Bool(hit))
        })
    }
}
