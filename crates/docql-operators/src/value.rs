//! The tagged result of evaluating any term.

use std::fmt;

use docql_core::error::{Error, Result};
use docql_core::id::DbId;
use docql_env::{DatumRef, Env, Node};

use crate::func::Func;
use crate::stream::DatumStream;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Database,
    Table,
    Selection,
    Sequence,
    SingleSelection,
    Datum,
    Function,
}

/// `CONVERTIBLE[from][to]`, indexed by `ValueType::index`.
const CONVERTIBLE: [[bool; 7]; 7] = {
    const T: bool = true;
    const F: bool = false;
    [
        //  DB TABLE SEL SEQ SSEL DATUM FUNC
        [T, F, F, F, F, F, F], // Database
        [F, T, T, T, F, F, F], // Table
        [F, F, T, T, F, F, F], // Selection
        [F, F, F, T, F, F, F], // Sequence
        [F, F, F, F, T, T, F], // SingleSelection
        [F, F, F, T, F, T, F], // Datum
        [F, F, F, F, F, F, T], // Function
    ]
};

impl ValueType {
    pub const ALL: [ValueType; 7] = [
        ValueType::Database,
        ValueType::Table,
        ValueType::Selection,
        ValueType::Sequence,
        ValueType::SingleSelection,
        ValueType::Datum,
        ValueType::Function,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Database => "DATABASE",
            ValueType::Table => "TABLE",
            ValueType::Selection => "SELECTION",
            ValueType::Sequence => "SEQUENCE",
            ValueType::SingleSelection => "SINGLE_SELECTION",
            ValueType::Datum => "DATUM",
            ValueType::Function => "FUNCTION",
        }
    }

    pub fn is_convertible(self, to: ValueType) -> bool {
        CONVERTIBLE[self.index()][to.index()]
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub enum Value {
    Database(DbId),
    Table(Table),
    Selection(Table, DatumStream),
    Sequence(DatumStream),
    SingleSelection(Table, DatumRef),
    Datum(DatumRef),
    Function(Func),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Database(id) => write!(f, "Database({id})"),
            Value::Table(t) => write!(f, "Table({})", t.name()),
            Value::Selection(t, _) => write!(f, "Selection({})", t.name()),
            Value::Sequence(_) => f.write_str("Sequence"),
            Value::SingleSelection(t, r) => write!(f, "SingleSelection({}, {r:?})", t.name()),
            Value::Datum(r) => write!(f, "Datum({r:?})"),
            Value::Function(func) => write!(f, "{func:?}"),
        }
    }
}

impl Value {
    /// A stream that is really an array becomes a `Datum`.
    pub fn from_stream(env: &mut Env, mut stream: DatumStream) -> Result<Value> {
        if stream.is_array() {
            if let Some(arr) = stream.as_array(env)? {
                return Ok(Value::Datum(arr));
            }
        }
        Ok(Value::Sequence(stream))
    }

    pub fn get_type(&self) -> ValueType {
        match self {
            Value::Database(_) => ValueType::Database,
            Value::Table(_) => ValueType::Table,
            Value::Selection(..) => ValueType::Selection,
            Value::Sequence(_) => ValueType::Sequence,
            Value::SingleSelection(..) => ValueType::SingleSelection,
            Value::Datum(_) => ValueType::Datum,
            Value::Function(_) => ValueType::Function,
        }
    }

    fn check(&self, to: ValueType) -> Result<()> {
        let from = self.get_type();
        if from.is_convertible(to) {
            Ok(())
        } else {
            Err(Error::type_mismatch(to.name(), from.name()))
        }
    }

    pub fn as_db(self) -> Result<DbId> {
        self.check(ValueType::Database)?;
        match self {
            Value::Database(id) => Ok(id),
            other => Err(unreachable_conversion(&other, ValueType::Database)),
        }
    }

    pub fn as_table(self) -> Result<Table> {
        self.check(ValueType::Table)?;
        match self {
            Value::Table(t) => Ok(t),
            other => Err(unreachable_conversion(&other, ValueType::Table)),
        }
    }

    pub fn as_selection(self, env: &mut Env) -> Result<(Table, DatumStream)> {
        self.check(ValueType::Selection)?;
        match self {
            Value::Table(t) => {
                let s = t.as_datum_stream(env)?;
                Ok((t, s))
            }
            Value::Selection(t, s) => Ok((t, s)),
            other => Err(unreachable_conversion(&other, ValueType::Selection)),
        }
    }

    /// Tables scan lazily; a datum must hold an array.
    pub fn as_seq(self, env: &mut Env) -> Result<DatumStream> {
        self.check(ValueType::Sequence)?;
        match self {
            Value::Table(t) => t.as_datum_stream(env),
            Value::Selection(_, s) | Value::Sequence(s) => Ok(s),
            Value::Datum(r) => DatumStream::from_array(env, r),
            other => Err(unreachable_conversion(&other, ValueType::Sequence)),
        }
    }

    pub fn as_single_selection(self) -> Result<(Table, DatumRef)> {
        self.check(ValueType::SingleSelection)?;
        match self {
            Value::SingleSelection(t, r) => Ok((t, r)),
            other => Err(unreachable_conversion(&other, ValueType::SingleSelection)),
        }
    }

    pub fn as_datum(&self) -> Result<DatumRef> {
        self.check(ValueType::Datum)?;
        match self {
            Value::Datum(r) | Value::SingleSelection(_, r) => Ok(*r),
            other => Err(unreachable_conversion(other, ValueType::Datum)),
        }
    }

    /// With `identity_shortcut`, a plain datum stands in for a constant
    /// one-argument function.
    pub fn as_func(self, env: &mut Env, identity_shortcut: bool) -> Result<Func> {
        match self {
            Value::Function(f) => Ok(f),
            Value::Datum(r) if identity_shortcut => Func::constant(env, r),
            other => Err(Error::type_mismatch(
                ValueType::Function.name(),
                other.get_type().name(),
            )),
        }
    }

    /// Convert to `to` if the conversion table allows it.
    pub fn convert(self, env: &mut Env, to: ValueType) -> Result<Value> {
        self.check(to)?;
        Ok(match to {
            ValueType::Database => Value::Database(self.as_db()?),
            ValueType::Table => Value::Table(self.as_table()?),
            ValueType::Selection => {
                let (t, s) = self.as_selection(env)?;
                Value::Selection(t, s)
            }
            ValueType::Sequence => Value::Sequence(self.as_seq(env)?),
            ValueType::SingleSelection => {
                let (t, r) = self.as_single_selection()?;
                Value::SingleSelection(t, r)
            }
            ValueType::Datum => Value::Datum(self.as_datum()?),
            ValueType::Function => Value::Function(self.as_func(env, false)?),
        })
    }

    pub fn as_bool(&self, env: &Env) -> Result<bool> {
        env.is_truthy(self.as_datum()?)
    }

    pub fn as_num(&self, env: &Env) -> Result<f64> {
        match env.node(self.as_datum()?)? {
            Node::Num(n) => Ok(*n),
            other => Err(Error::type_mismatch("NUMBER", other.type_name())),
        }
    }

    pub fn as_int(&self, env: &Env) -> Result<i64> {
        env.to_datum(self.as_datum()?)?.as_int()
    }

    pub fn as_str(&self, env: &Env) -> Result<String> {
        match env.node(self.as_datum()?)? {
            Node::Str(s) => Ok(s.clone()),
            other => Err(Error::type_mismatch("STRING", other.type_name())),
        }
    }
}

fn unreachable_conversion(v: &Value, to: ValueType) -> Error {
    Error::invariant(format!(
        "conversion {} -> {} passed the table but has no implementation",
        v.get_type(),
        to
    ))
}
